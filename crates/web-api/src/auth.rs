//! JWT 认证和授权模块
//!
//! 提供令牌签发、校验，以及普通用户和管理员两种请求提取器。

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use config::AuthConfig;
use domain::{User, UserId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// JWT Claims 结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub name: String,
    pub avatar: Option<String>,
    pub description: Option<String>,
    /// 签发时的余额快照，不作为扣费依据
    pub score: i64,
    pub status: i16,
    pub root: bool,
    pub exp: i64,
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    ttl_hours: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            ttl_hours,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl_hours)
    }

    pub fn issue(&self, user: &User, root: bool) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.ttl_hours);
        let claims = Claims {
            user_id: Uuid::from(user.id),
            email: user.email.as_ref().map(|email| email.to_string()),
            name: user.display_name(),
            avatar: user.avatar.clone(),
            description: user.description.clone(),
            score: user.score,
            status: user.status.ordinal(),
            root,
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|err| {
            tracing::error!(error = %err, "token generation failed");
            ApiError::internal()
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "rejected token");
                ApiError::unauthorized()
            })
    }

    /// 从 `Authorization: Bearer <token>` 中解析令牌
    pub fn claims_from_headers(&self, headers: &HeaderMap) -> Result<Claims, ApiError> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(ApiError::unauthorized)?;
        self.verify(token)
    }
}

/// 已登录的用户，取自数据库中的最新记录。
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> UserId {
        self.0.id
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = state.jwt_service.claims_from_headers(&parts.headers)?;
        let user = state
            .user_service
            .active_user(UserId::from(claims.user_id))
            .await?;
        Ok(AuthUser(user))
    }
}

/// 管理员用户：令牌有效，且当前记录的邮箱为配置的管理员邮箱、状态正常。
pub struct RootUser(pub User);

impl FromRequestParts<AppState> for RootUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = state.jwt_service.claims_from_headers(&parts.headers)?;
        let user = state
            .user_service
            .require_root(UserId::from(claims.user_id))
            .await?;
        Ok(RootUser(user))
    }
}
