mod chat_turn_service;
mod credit_ledger;
mod history_service;
mod room_service;
mod user_service;

pub use chat_turn_service::{
    ChatProcessRequest, ChatSettings, ChatTurnService, ChatTurnServiceDependencies,
    CreditDeniedReply, FragmentStream, StreamFragment, TurnReply,
};
pub use credit_ledger::CreditLedger;
pub use history_service::{HistoryService, HistoryServiceDependencies};
pub use room_service::{
    CreateRoomRequest, DeleteTurnRequest, RenameRoomRequest, RoomService, RoomServiceDependencies,
};
pub use user_service::{
    AccountSettings, AuthenticateUserRequest, PaymentRequest, RechargeRequest, RegisterOutcome,
    RegisterUserRequest, ResetPasswordRequest, UpdateProfileRequest, UserService,
    UserServiceDependencies,
};
