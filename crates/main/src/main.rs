//! 主应用程序入口
//!
//! 加载配置、连接数据库并启动 Axum Web API 服务。

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use application::{
    services::{AccountSettings, ChatSettings},
    ChatTurnService, ChatTurnServiceDependencies, Clock, CreditLedger, HistoryService,
    HistoryServiceDependencies, RequestRateLimiter, RoomService, RoomServiceDependencies,
    SystemClock, UserService, UserServiceDependencies,
};
use axum::http::HeaderValue;
use config::AppConfig;
use domain::RootAccount;
use infrastructure::Infrastructure;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

const RATE_LIMIT_SWEEP: Duration = Duration::from_secs(10 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    if let Err(err) = config.validate_for_production() {
        tracing::warn!(error = %err, "configuration is not suitable for production");
    }

    let infrastructure = Infrastructure::connect(&config)
        .await
        .context("failed to initialise infrastructure")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let root = RootAccount::new(config.root_user());

    let room_service = Arc::new(RoomService::new(RoomServiceDependencies {
        room_repository: infrastructure.room_repository(),
        turn_repository: infrastructure.turn_repository(),
        clock: clock.clone(),
    }));
    let history_service = Arc::new(HistoryService::new(HistoryServiceDependencies {
        room_service: room_service.clone(),
        turn_repository: infrastructure.turn_repository(),
        clock: clock.clone(),
    }));
    let chat_turn_service = Arc::new(ChatTurnService::new(ChatTurnServiceDependencies {
        room_service: room_service.clone(),
        turn_repository: infrastructure.turn_repository(),
        completion: infrastructure.completion_trait(),
        ledger: Arc::new(CreditLedger::new(
            infrastructure.user_repository(),
            root.clone(),
        )),
        clock: clock.clone(),
        settings: ChatSettings {
            system_message: config.openai.system_message.clone(),
            context_depth: config.openai.context_depth,
        },
    }));
    let user_service = Arc::new(UserService::new(UserServiceDependencies {
        user_repository: infrastructure.user_repository(),
        code_repository: infrastructure.code_repository(),
        recharge_repository: infrastructure.recharge_repository(),
        password_hasher: infrastructure.password_hasher_trait(),
        mailer: infrastructure.mailer_trait(),
        clock,
        settings: AccountSettings {
            site: config.site.clone(),
            codes: config.codes.clone(),
            root,
        },
    }));

    let rate_limiter = Arc::new(RequestRateLimiter::per_hour(
        config.limits.max_request_per_hour,
    ));
    if !rate_limiter.is_unlimited() {
        let sweeper = rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RATE_LIMIT_SWEEP);
            loop {
                interval.tick().await;
                sweeper.cleanup_expired();
            }
        });
    }

    let state = AppState {
        user_service,
        room_service,
        history_service,
        chat_turn_service,
        completion: infrastructure.completion_trait(),
        rate_limiter,
        jwt_service: Arc::new(JwtService::from_config(&config.auth)),
    };

    let app = router(state)
        .layer(cors_layer(&config.server.cors_origins))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        model = %config.openai.model,
        register_enabled = config.site.register_enabled,
        "chatgpt-web server listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid cors origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
