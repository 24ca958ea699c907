use std::sync::Arc;

use application::{
    ChatRoomRepository, ChatTurnRepository, CompletionError, CompletionService, Mailer,
    PasswordHasher, RechargeRepository, UserRepository, VerificationCodeRepository,
};
use config::AppConfig;
use thiserror::Error;

use crate::{
    mailer::LogMailer,
    migrations::MIGRATOR,
    openai::OpenAiCompletionService,
    password::BcryptPasswordHasher,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("completion client error: {0}")]
    Completion(#[from] CompletionError),
}

/// 连接数据库、执行迁移并创建各适配器。
#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<PgStorage>,
    pub password_hasher: Arc<BcryptPasswordHasher>,
    pub completion: Arc<OpenAiCompletionService>,
    pub mailer: Arc<LogMailer>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("database migrations applied");

        let completion = OpenAiCompletionService::new(&config.openai)?;
        if config.openai.api_key.is_none() {
            tracing::warn!("openai api key is not set, chat requests will fail");
        }

        Ok(Self {
            storage: Arc::new(PgStorage::new(pool)),
            password_hasher: Arc::new(BcryptPasswordHasher::new(config.auth.bcrypt_cost)),
            completion: Arc::new(completion),
            mailer: Arc::new(LogMailer::new()),
        })
    }

    pub fn user_repository(&self) -> Arc<dyn UserRepository> {
        self.storage.user_repository.clone()
    }

    pub fn room_repository(&self) -> Arc<dyn ChatRoomRepository> {
        self.storage.room_repository.clone()
    }

    pub fn turn_repository(&self) -> Arc<dyn ChatTurnRepository> {
        self.storage.turn_repository.clone()
    }

    pub fn recharge_repository(&self) -> Arc<dyn RechargeRepository> {
        self.storage.recharge_repository.clone()
    }

    pub fn code_repository(&self) -> Arc<dyn VerificationCodeRepository> {
        self.storage.code_repository.clone()
    }

    pub fn password_hasher_trait(&self) -> Arc<dyn PasswordHasher> {
        self.password_hasher.clone()
    }

    pub fn completion_trait(&self) -> Arc<dyn CompletionService> {
        self.completion.clone()
    }

    pub fn mailer_trait(&self) -> Arc<dyn Mailer> {
        self.mailer.clone()
    }
}
