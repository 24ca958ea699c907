//! ChatGPT 网页端后端的核心领域模型
//!
//! 包含用户、聊天室、对话记录、积分规则和历史视图等领域逻辑。

pub mod chat_room;
pub mod chat_turn;
pub mod credit;
pub mod errors;
pub mod history;
pub mod recharge;
pub mod user;
pub mod value_objects;
pub mod verification;

// 重新导出常用类型
pub use chat_room::*;
pub use chat_turn::*;
pub use credit::*;
pub use errors::*;
pub use history::*;
pub use recharge::*;
pub use user::*;
pub use value_objects::*;
pub use verification::*;
