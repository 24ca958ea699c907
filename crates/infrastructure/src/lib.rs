//! 基础设施层实现。
//!
//! 提供 Postgres 仓储、密码哈希、模型服务客户端和邮件发送等适配器，
//! 实现应用层定义的接口。

pub mod builder;
pub mod mailer;
pub mod migrations;
pub mod openai;
pub mod password;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use mailer::LogMailer;
pub use migrations::MIGRATOR;
pub use openai::OpenAiCompletionService;
pub use password::BcryptPasswordHasher;
pub use repository::{
    create_pg_pool, PgChatRoomRepository, PgChatTurnRepository, PgRechargeRepository,
    PgStorage, PgUserRepository, PgVerificationCodeRepository,
};
