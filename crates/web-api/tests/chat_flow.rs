mod support;

use axum::http::{header, StatusCode};
use domain::UserStatus;
use serde_json::{json, Value};

use support::{json_body, text_body, TestApp};

fn fragments(body: &str) -> Vec<Value> {
    body.split('\n')
        .map(|line| serde_json::from_str(line).expect("fragment json"))
        .collect()
}

#[tokio::test]
async fn last_point_streams_then_denies_next_turn() {
    let app = TestApp::new();
    let (user, token) = app.signed_in("alice@example.com", 1).await;
    app.create_room(&token, 7).await;

    let response = app
        .post_json(
            "/api/chat-process",
            Some(&token),
            json!({ "roomId": 7, "uuid": 1_000, "prompt": "hi" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    let body = text_body(response).await;
    let parts = fragments(&body);
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["text"], "Hel");
    assert_eq!(parts[1]["text"], "Hello");
    assert_eq!(parts[1]["id"], "chatcmpl-1");

    let stored = app.users.get(user.id).await.expect("user");
    assert_eq!(stored.score, 0);
    assert_eq!(stored.status, UserStatus::NoScore);
    assert_eq!(app.completion.requests()[0].prompt, "hi");

    let denied = app
        .post_json(
            "/api/chat-process",
            Some(&token),
            json!({ "roomId": 7, "uuid": 2_000, "prompt": "again" }),
        )
        .await;
    assert_eq!(denied.status(), StatusCode::OK);
    let denied = json_body(denied).await;
    assert_eq!(denied["id"], "200");
    assert_eq!(denied["text"], "当前账户没有积分|No points");
    assert_eq!(denied["parentMessageId"], "200");
    assert_eq!(app.completion.calls(), 1);

    let history = json_body(app.get("/api/chat-hisroty?roomId=7", Some(&token)).await).await;
    assert_eq!(history["status"], "Success");
    let rows = history["data"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["inversion"], true);
    assert_eq!(rows[0]["text"], "hi");
    assert_eq!(rows[1]["inversion"], false);
    assert_eq!(rows[1]["text"], "Hello");
    assert_eq!(rows[1]["conversationOptions"]["parentMessageId"], "chatcmpl-1");
}

#[tokio::test]
async fn root_is_never_charged() {
    let app = TestApp::new();
    let (user, token) = app.signed_in(support::ROOT_EMAIL, 0).await;
    app.create_room(&token, 1).await;

    let response = app
        .post_json(
            "/chat-process",
            Some(&token),
            json!({ "roomId": 1, "uuid": 10, "prompt": "hi" }),
        )
        .await;
    let body = text_body(response).await;
    assert!(body.starts_with('{'));
    assert_eq!(app.users.get(user.id).await.expect("user").score, 0);
    assert_eq!(app.completion.calls(), 1);
}

#[tokio::test]
async fn empty_room_history_returns_placeholder() {
    let app = TestApp::new();
    let (_, token) = app.signed_in("alice@example.com", 10).await;
    app.create_room(&token, 5).await;

    let history = json_body(app.get("/chat-hisroty?roomId=5", Some(&token)).await).await;
    let rows = history["data"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["uuid"], 3);
    assert_eq!(rows[0]["text"], "暂无对话记录 | No chat history");
    assert_eq!(rows[0]["inversion"], false);
}

#[tokio::test]
async fn foreign_room_is_invisible() {
    let app = TestApp::new();
    let (_, owner) = app.signed_in("owner@example.com", 10).await;
    let (_, intruder) = app.signed_in("intruder@example.com", 10).await;
    app.create_room(&owner, 9).await;

    let history = json_body(app.get("/chat-hisroty?roomId=9", Some(&intruder)).await).await;
    assert_eq!(history["status"], "Success");
    assert_eq!(history["data"], json!([]));

    let rename = json_body(
        app.post_json(
            "/room-rename",
            Some(&intruder),
            json!({ "roomId": 9, "title": "mine now" }),
        )
        .await,
    )
    .await;
    assert_eq!(rename["status"], "Fail");
    assert_eq!(rename["message"], "Unknow room");

    let chat = app
        .post_json(
            "/chat-process",
            Some(&intruder),
            json!({ "roomId": 9, "uuid": 1, "prompt": "hi" }),
        )
        .await;
    assert_eq!(json_body(chat).await["message"], "Unknow room");
    assert_eq!(app.completion.calls(), 0);
}

#[tokio::test]
async fn room_lifecycle_and_turn_cleanup() {
    let app = TestApp::new();
    let (user, token) = app.signed_in("alice@example.com", 10).await;
    app.create_room(&token, 11).await;
    app.create_room(&token, 12).await;

    let duplicate = json_body(
        app.post_json(
            "/room-create",
            Some(&token),
            json!({ "roomId": 11, "title": "again" }),
        )
        .await,
    )
    .await;
    assert_eq!(duplicate["message"], "Create error");

    let renamed = json_body(
        app.post_json(
            "/room-rename",
            Some(&token),
            json!({ "roomId": 11, "title": "trip" }),
        )
        .await,
    )
    .await;
    assert_eq!(renamed["data"]["title"], "trip");
    assert_eq!(renamed["data"]["isEdit"], false);

    let stream = app
        .post_json(
            "/chat-process",
            Some(&token),
            json!({ "roomId": 11, "uuid": 500, "prompt": "hi" }),
        )
        .await;
    text_body(stream).await;
    let key = domain::RoomKey::new(user.id, domain::RoomId(11));
    assert_eq!(app.turns.count_in_room(key).await, 1);

    let half = json_body(
        app.post_json(
            "/chat-delete",
            Some(&token),
            json!({ "roomId": 11, "uuid": 500, "inversion": false }),
        )
        .await,
    )
    .await;
    assert_eq!(half["status"], "Success");
    let history = json_body(app.get("/chat-hisroty?roomId=11", Some(&token)).await).await;
    let rows = history["data"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["inversion"], true);

    let deleted = json_body(
        app.post_json("/room-delete", Some(&token), json!({ "roomId": 11 }))
            .await,
    )
    .await;
    assert_eq!(deleted["status"], "Success");

    let rooms = json_body(app.get("/chatrooms", Some(&token)).await).await;
    let uuids: Vec<i64> = rooms["data"]
        .as_array()
        .expect("rooms")
        .iter()
        .map(|room| room["uuid"].as_i64().expect("uuid"))
        .collect();
    assert_eq!(uuids, vec![12]);

    let history = json_body(app.get("/chat-hisroty?roomId=11", Some(&token)).await).await;
    assert_eq!(history["data"], json!([]));
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = TestApp::new();

    let response = app.get("/chatrooms", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "Fail");
    assert_eq!(body["message"], "Please authenticate.");

    let response = app.get("/chatrooms", Some("not-a-jwt")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_requests_are_rate_limited() {
    let app = TestApp::builder().max_request_per_hour(1).build();
    let (_, token) = app.signed_in("alice@example.com", 10).await;
    app.create_room(&token, 3).await;

    let first = app
        .post_json(
            "/chat-process",
            Some(&token),
            json!({ "roomId": 3, "uuid": 1, "prompt": "one" }),
        )
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    text_body(first).await;

    let second = app
        .post_json(
            "/chat-process",
            Some(&token),
            json!({ "roomId": 3, "uuid": 2, "prompt": "two" }),
        )
        .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        json_body(second).await["message"],
        "Too many request from this IP in 1 hour"
    );
}

#[tokio::test]
async fn provider_failure_ends_stream_with_fail_fragment() {
    let app = TestApp::builder()
        .completion(application::testing::ScriptedCompletionService::failing_after(
            &["par"],
            application::CompletionError::Incomplete,
        ))
        .build();
    let (_, token) = app.signed_in("alice@example.com", 10).await;
    app.create_room(&token, 4).await;

    let body = text_body(
        app.post_json(
            "/chat-process",
            Some(&token),
            json!({ "roomId": 4, "uuid": 1, "prompt": "hi" }),
        )
        .await,
    )
    .await;
    let parts = fragments(&body);
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["text"], "par");
    assert_eq!(parts[1]["status"], "Fail");
    assert!(parts[1]["data"].is_null());
}

#[tokio::test]
async fn history_query_tolerates_blank_and_missing_ids() {
    let app = TestApp::new();
    let (_, token) = app.signed_in("alice@example.com", 10).await;
    app.create_room(&token, 5).await;

    let blank = app.get("/chat-hisroty?roomId=5&lastId=", Some(&token)).await;
    assert_eq!(blank.status(), StatusCode::OK);
    let blank = json_body(blank).await;
    assert_eq!(blank["status"], "Success");
    assert_eq!(blank["data"][0]["uuid"], 3);

    let missing = app.get("/chat-hisroty", Some(&token)).await;
    assert_eq!(missing.status(), StatusCode::OK);
    let missing = json_body(missing).await;
    assert_eq!(missing["status"], "Success");
    assert_eq!(missing["data"], json!([]));

    let zero = json_body(app.get("/chat-hisroty?roomId=0", Some(&token)).await).await;
    assert_eq!(zero["data"], json!([]));
}

#[tokio::test]
async fn malformed_history_query_gets_fail_envelope() {
    let app = TestApp::new();
    let (_, token) = app.signed_in("alice@example.com", 10).await;

    let response = app.get("/chat-hisroty?roomId=abc", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["status"], "Fail");
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn cleared_turn_cannot_be_regenerated() {
    let app = TestApp::new();
    let (user, token) = app.signed_in("alice@example.com", 10).await;
    app.create_room(&token, 6).await;

    let first = app
        .post_json(
            "/chat-process",
            Some(&token),
            json!({ "roomId": 6, "uuid": 100, "prompt": "hi" }),
        )
        .await;
    text_body(first).await;

    let cleared = json_body(
        app.post_json("/chat-clear", Some(&token), json!({ "roomId": 6 }))
            .await,
    )
    .await;
    assert_eq!(cleared["status"], "Success");

    let again = app
        .post_json(
            "/chat-process",
            Some(&token),
            json!({ "roomId": 6, "uuid": 100, "regenerate": true }),
        )
        .await;
    let again = json_body(again).await;
    assert_eq!(again["status"], "Fail");
    assert_eq!(again["message"], "Unknow room");
    assert_eq!(app.completion.calls(), 1);
    assert_eq!(app.users.get(user.id).await.expect("user").score, 9);
}
