//! 领域模型错误定义
//!
//! 定义了系统中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("user not found")]
    UserNotFound,

    /// 房间不存在、已删除或不属于当前用户
    #[error("room not found")]
    RoomNotFound,

    #[error("chat turn not found")]
    TurnNotFound,

    #[error("room already exists")]
    RoomAlreadyExists,

    /// 用户状态不允许该操作（待验证、已删除等）
    #[error("user status does not allow this operation: {reason}")]
    UserStatusRejected { reason: String },

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("operation not allowed")]
    OperationNotAllowed,

    /// 一次性验证码错误或已过期
    #[error("verification code rejected")]
    VerificationRejected,
}

impl DomainError {
    /// 创建参数错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn user_status_rejected(reason: impl Into<String>) -> Self {
        Self::UserStatusRejected {
            reason: reason.into(),
        }
    }
}

/// 持久化层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
