use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;

pub(crate) const MSG_UNAUTHORIZED: &str = "Please authenticate.";
pub(crate) const MSG_FORBIDDEN: &str = "无权限 | No permission.";
pub(crate) const MSG_UNKNOWN_ROOM: &str = "Unknow room";
const MSG_BAD_LOGIN: &str = "哎呀，好像出了一些问题！请检查您的用户名和密码是否正确。";
const MSG_INTERNAL: &str = "服务器开小差了 | Internal server error";

/// 所有 JSON 接口共用的响应结构。
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: &'static str,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "Success",
            message: None,
            data: Some(data),
        }
    }

    pub fn success_with_message(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status: "Success",
            message: Some(message.into()),
            data,
        }
    }
}

impl Envelope<()> {
    pub fn done() -> Self {
        Self {
            status: "Success",
            message: None,
            data: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::success_with_message(message, None)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "Fail",
            message: Some(message.into()),
            data: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, MSG_UNAUTHORIZED)
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, MSG_FORBIDDEN)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 业务层面的失败，HTTP 状态仍为 200
    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, MSG_INTERNAL)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::validation(errors.to_string())
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use ApplicationError as AppErr;

        match error {
            AppErr::Domain(DomainError::RoomNotFound | DomainError::TurnNotFound) => {
                ApiError::fail(MSG_UNKNOWN_ROOM)
            }
            AppErr::Domain(DomainError::RoomAlreadyExists) => ApiError::fail("Create error"),
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => {
                ApiError::validation(format!("{field}: {reason}"))
            }
            AppErr::Domain(DomainError::UserStatusRejected { reason }) => ApiError::fail(reason),
            AppErr::Domain(DomainError::UserAlreadyExists) => {
                ApiError::fail("邮箱已存在 | The email exists")
            }
            AppErr::Domain(DomainError::UserNotFound) => {
                ApiError::fail("用户不存在 | User does not exist.")
            }
            AppErr::Domain(DomainError::VerificationRejected) => ApiError::fail("验证码不正确"),
            AppErr::Domain(
                DomainError::InsufficientPermissions | DomainError::OperationNotAllowed,
            )
            | AppErr::Authorization => ApiError::forbidden(),
            AppErr::Authentication => ApiError::unauthorized(),
            AppErr::InvalidCredentials => ApiError::fail(MSG_BAD_LOGIN),
            AppErr::Rejected(message) => ApiError::fail(message),
            AppErr::RateLimited(err) => ApiError::new(StatusCode::TOO_MANY_REQUESTS, err.to_string()),
            AppErr::Repository(RepositoryError::NotFound) => {
                ApiError::new(StatusCode::NOT_FOUND, "requested resource not found")
            }
            AppErr::Repository(RepositoryError::Conflict) => {
                ApiError::new(StatusCode::CONFLICT, "resource was modified concurrently")
            }
            AppErr::Repository(RepositoryError::Storage { message }) => {
                tracing::error!(error = %message, "storage failure");
                ApiError::internal()
            }
            AppErr::Password(err) => {
                tracing::error!(error = %err, "password hasher failure");
                ApiError::internal()
            }
            AppErr::Mail(err) => {
                tracing::error!(error = %err, "mail delivery failure");
                ApiError::internal()
            }
            AppErr::Infrastructure(message) => {
                tracing::error!(error = %message, "infrastructure failure");
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(Envelope::fail(self.message))).into_response()
    }
}
