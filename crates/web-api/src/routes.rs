use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use validator::Validate;

use application::services::{
    ChatProcessRequest, CreateRoomRequest, DeleteTurnRequest, RenameRoomRequest, TurnReply,
};
use application::ApplicationError;
use domain::{ChatRoom, DomainError, ViewTurn};

use crate::{
    account_routes::account_routes,
    admin_routes::admin_routes,
    auth::AuthUser,
    error::{ApiError, Envelope},
    extract::{ValidJson, ValidQuery},
    state::AppState,
    stream::framed_body,
};

/// 客户端侧边栏展示的房间
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomView {
    uuid: i64,
    title: String,
    is_edit: bool,
}

impl From<ChatRoom> for RoomView {
    fn from(room: ChatRoom) -> Self {
        Self {
            uuid: room.room_id.value(),
            title: room.title,
            is_edit: false,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct RoomPayload {
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[validate(range(min = 1))]
    room_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct RoomIdPayload {
    room_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    #[serde(default, deserialize_with = "optional_id")]
    room_id: Option<i64>,
    #[serde(default, deserialize_with = "optional_id")]
    last_id: Option<i64>,
}

/// 空字符串和缺省一样视为未提供
fn optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct DeleteTurnPayload {
    room_id: i64,
    uuid: i64,
    inversion: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatContextOptions {
    parent_message_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ChatProcessPayload {
    room_id: i64,
    uuid: i64,
    #[serde(default)]
    regenerate: bool,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    options: Option<ChatContextOptions>,
    system_message: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/session", post(session))
        .route("/chatrooms", get(list_rooms))
        .route("/room-create", post(create_room))
        .route("/room-rename", post(rename_room))
        .route("/room-delete", post(delete_room))
        .route("/chat-hisroty", get(chat_history))
        .route("/chat-delete", post(delete_turn))
        .route("/chat-clear", post(clear_room))
        .route("/chat-clear-all", post(clear_all))
        .route("/chat-process", post(chat_process))
        .merge(account_routes())
        .merge(admin_routes())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn session(State(state): State<AppState>) -> Json<Envelope<serde_json::Value>> {
    let site = &state.user_service.settings().site;
    Json(Envelope::success_with_message(
        "",
        Some(json!({
            "auth": site.login_enabled,
            "allowRegister": site.register_enabled,
            "model": state.completion.settings().model,
        })),
    ))
}

async fn list_rooms(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Envelope<Vec<RoomView>>>, ApiError> {
    let rooms = state.room_service.list_rooms(user.id()).await?;
    Ok(Json(Envelope::success(
        rooms.into_iter().map(RoomView::from).collect(),
    )))
}

async fn create_room(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<RoomPayload>,
) -> Result<Json<Envelope<RoomView>>, ApiError> {
    let room = state
        .room_service
        .create_room(CreateRoomRequest {
            user_id: user.id(),
            room_id: payload.room_id,
            title: payload.title,
        })
        .await?;
    Ok(Json(Envelope::success(room.into())))
}

async fn rename_room(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<RoomPayload>,
) -> Result<Json<Envelope<RoomView>>, ApiError> {
    let room = state
        .room_service
        .rename_room(RenameRoomRequest {
            user_id: user.id(),
            room_id: payload.room_id,
            title: payload.title,
        })
        .await?;
    Ok(Json(Envelope::success(room.into())))
}

async fn delete_room(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<RoomIdPayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state
        .room_service
        .delete_room(user.id(), payload.room_id)
        .await?;
    Ok(Json(Envelope::done()))
}

async fn chat_history(
    State(state): State<AppState>,
    user: AuthUser,
    ValidQuery(query): ValidQuery<HistoryQuery>,
) -> Result<Json<Envelope<Vec<ViewTurn>>>, ApiError> {
    let Some(room_id) = query.room_id.filter(|id| *id > 0) else {
        return Ok(Json(Envelope::success(Vec::new())));
    };
    match state
        .history_service
        .list_turns(user.id(), room_id, query.last_id)
        .await
    {
        Ok(page) => Ok(Json(Envelope::success(page.into_rows()))),
        // 不属于自己的房间按空列表处理
        Err(ApplicationError::Domain(DomainError::RoomNotFound)) => {
            Ok(Json(Envelope::success(Vec::new())))
        }
        Err(err) => Err(err.into()),
    }
}

async fn delete_turn(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<DeleteTurnPayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state
        .room_service
        .delete_turn_half(DeleteTurnRequest {
            user_id: user.id(),
            room_id: payload.room_id,
            uuid: payload.uuid,
            inversion: payload.inversion,
        })
        .await?;
    Ok(Json(Envelope::done()))
}

async fn clear_room(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<RoomIdPayload>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state
        .room_service
        .clear_room(user.id(), payload.room_id)
        .await?;
    Ok(Json(Envelope::done()))
}

async fn clear_all(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Envelope<()>>, ApiError> {
    state.room_service.clear_all(user.id()).await?;
    Ok(Json(Envelope::done()))
}

async fn chat_process(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(payload): ValidJson<ChatProcessPayload>,
) -> Result<Response, ApiError> {
    state
        .rate_limiter
        .check(user.id())
        .map_err(ApplicationError::from)?;

    let reply = state
        .chat_turn_service
        .process(ChatProcessRequest {
            user_id: user.id(),
            room_id: payload.room_id,
            uuid: payload.uuid,
            regenerate: payload.regenerate,
            prompt: payload.prompt,
            parent_message_id: payload
                .options
                .unwrap_or_default()
                .parent_message_id
                .filter(|id| !id.is_empty()),
            system_message: payload.system_message,
        })
        .await?;

    match reply {
        TurnReply::CreditDenied(denied) => Ok(Json(denied).into_response()),
        TurnReply::Streaming(fragments) => Response::builder()
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::from_stream(framed_body(fragments)))
            .map_err(|err| {
                tracing::error!(error = %err, "failed to build stream response");
                ApiError::internal()
            }),
    }
}
