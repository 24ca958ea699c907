use std::sync::Arc;

use application::{
    ChatTurnService, CompletionService, HistoryService, RequestRateLimiter, RoomService,
    UserService,
};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub room_service: Arc<RoomService>,
    pub history_service: Arc<HistoryService>,
    pub chat_turn_service: Arc<ChatTurnService>,
    /// 只用于展示当前模型配置
    pub completion: Arc<dyn CompletionService>,
    pub rate_limiter: Arc<RequestRateLimiter>,
    pub jwt_service: Arc<JwtService>,
}
