//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP 请求委托给应用层的用例服务，
//! 对话接口以换行分隔的 JSON 片段流式返回。

mod account_routes;
mod admin_routes;
mod auth;
mod error;
mod extract;
mod routes;
mod state;
mod stream;

pub use auth::{AuthUser, Claims, JwtService, RootUser};
pub use error::{ApiError, Envelope};
pub use routes::router;
pub use state::AppState;
