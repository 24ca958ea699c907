//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务，处理输入校验、扣费顺序、
//! 以及对外部适配器（模型服务、密码哈希、邮件）的抽象。

pub mod clock;
pub mod completion;
pub mod error;
pub mod mailer;
pub mod password;
pub mod rate_limiter;
pub mod repository;
pub mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use completion::{
    estimate_tokens, ChatMessage, CompletionError, CompletionEvent, CompletionRequest,
    CompletionResult, CompletionService, CompletionSettings, CompletionStream, ContextMessage,
    Role,
};
pub use error::ApplicationError;
pub use mailer::{MailError, Mailer};
pub use password::{PasswordHasher, PasswordHasherError};
pub use rate_limiter::{RateLimitError, RequestRateLimiter};
pub use repository::{
    ChatRoomRepository, ChatTurnRepository, RechargeRepository, UserRepository,
    VerificationCodeRepository,
};
pub use services::{
    ChatTurnService, ChatTurnServiceDependencies, CreditLedger, HistoryService,
    HistoryServiceDependencies, RoomService, RoomServiceDependencies, UserService,
    UserServiceDependencies,
};
