use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use validator::Validate;

use application::services::{PaymentRequest, RechargeRequest};
use application::CompletionSettings;

use crate::{
    auth::RootUser,
    error::{ApiError, Envelope},
    extract::ValidJson,
    state::AppState,
};

/// 仅管理员可用的积分和配置接口
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/recharge", post(recharge))
        .route("/payment", post(payment))
        .route("/config", post(model_config))
}

#[derive(Debug, Deserialize, Validate)]
struct RechargePayload {
    #[validate(email)]
    email: String,
    #[validate(range(min = 0))]
    score: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct PaymentPayload {
    #[validate(email)]
    email: String,
    #[validate(range(min = 1))]
    amount: i64,
    payment_method: Option<String>,
    transaction_id: Option<String>,
    remark: Option<String>,
}

async fn recharge(
    State(state): State<AppState>,
    RootUser(admin): RootUser,
    ValidJson(payload): ValidJson<RechargePayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let user = state
        .user_service
        .recharge(RechargeRequest {
            email: payload.email,
            score: payload.score,
        })
        .await?;
    tracing::info!(admin_id = %admin.id, user_id = %user.id, score = user.score, "balance set");
    Ok(Json(Envelope::message("更新成功 | Update successfully")))
}

async fn payment(
    State(state): State<AppState>,
    RootUser(admin): RootUser,
    ValidJson(payload): ValidJson<PaymentPayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let user = state
        .user_service
        .payment(PaymentRequest {
            email: payload.email,
            amount: payload.amount,
            payment_method: payload.payment_method,
            transaction_id: payload.transaction_id,
            remark: payload.remark,
        })
        .await?;
    tracing::info!(admin_id = %admin.id, user_id = %user.id, score = user.score, "payment recorded");
    Ok(Json(Envelope::message("充值成功 | Update successfully")))
}

async fn model_config(
    State(state): State<AppState>,
    _admin: RootUser,
) -> Json<Envelope<CompletionSettings>> {
    Json(Envelope::success(state.completion.settings()))
}
