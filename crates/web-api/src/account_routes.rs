use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use application::services::{
    AuthenticateUserRequest, RegisterOutcome, RegisterUserRequest, ResetPasswordRequest,
    UpdateProfileRequest,
};

use crate::{
    auth::AuthUser,
    error::{ApiError, Envelope},
    extract::ValidJson,
    state::AppState,
};

/// 账号注册、登录、验证和找回密码
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/user-register", post(register))
        .route("/user-login", post(login))
        .route("/verify", post(verify))
        .route("/user-info", post(update_info))
        .route("/send-code", post(send_code))
        .route("/reset-password", post(reset_password))
}

#[derive(Debug, Deserialize, Validate)]
struct CredentialsPayload {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct VerifyPayload {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize, Validate)]
struct UserInfoPayload {
    #[validate(length(max = 64))]
    name: Option<String>,
    #[validate(length(max = 1024))]
    avatar: Option<String>,
    #[validate(length(max = 512))]
    description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct SendCodePayload {
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize, Validate)]
struct ResetPasswordPayload {
    #[serde(default)]
    email: String,
    #[validate(length(min = 1))]
    password: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Serialize)]
struct TokenData {
    token: String,
}

async fn register(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CredentialsPayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let outcome = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;

    let message = match outcome {
        RegisterOutcome::Active => "注册成功 | Register success",
        RegisterOutcome::VerificationSent => {
            "注册成功, 去邮箱中验证吧 | Registration is successful, you need to go to email verification"
        }
    };
    Ok(Json(Envelope::message(message)))
}

async fn login(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CredentialsPayload>,
) -> Result<Json<Envelope<TokenData>>, ApiError> {
    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            username: payload.username,
            password: payload.password,
        })
        .await?;

    let root = state.user_service.is_root(&user);
    let token = state.jwt_service.issue(&user, root)?;
    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(Envelope::success_with_message(
        "登录成功",
        Some(TokenData { token }),
    )))
}

async fn verify(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<VerifyPayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state.user_service.verify(&payload.token).await?;
    Ok(Json(Envelope::message("验证成功 | Verify successfully")))
}

async fn update_info(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<UserInfoPayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state
        .user_service
        .update_profile(
            user.id(),
            UpdateProfileRequest {
                name: payload.name,
                avatar: payload.avatar,
                description: payload.description,
            },
        )
        .await?;
    Ok(Json(Envelope::message("更新成功 | Update successfully")))
}

async fn send_code(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<SendCodePayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state.user_service.send_reset_code(&payload.email).await?;
    Ok(Json(Envelope::message(
        "验证码发送成功，请到邮箱查看验证码",
    )))
}

async fn reset_password(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<ResetPasswordPayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state
        .user_service
        .reset_password(ResetPasswordRequest {
            email: payload.email,
            password: payload.password,
            code: payload.code,
        })
        .await?;
    Ok(Json(Envelope::message("更改成功 | Update successfully")))
}
