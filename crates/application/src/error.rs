use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::mailer::MailError;
use crate::password::PasswordHasherError;
use crate::rate_limiter::RateLimitError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0:?}")]
    Repository(RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("mail error: {0}")]
    Mail(#[from] MailError),
    #[error("rate limited: {0}")]
    RateLimited(#[from] RateLimitError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
    /// 登录凭据错误
    #[error("invalid credentials")]
    InvalidCredentials,
    /// 缺少或无效的会话令牌
    #[error("authentication failed")]
    Authentication,
    /// 需要管理员权限
    #[error("authorization failed")]
    Authorization,
    /// 业务规则拒绝，消息原样返回给客户端
    #[error("{0}")]
    Rejected(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        ApplicationError::Rejected(message.into())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
