#![allow(dead_code)]

use std::sync::Arc;

use application::{
    services::{AccountSettings, ChatSettings},
    testing::{
        sample_user, InMemoryChatRoomRepository, InMemoryChatTurnRepository,
        InMemoryRechargeRepository, InMemoryUserRepository, InMemoryVerificationCodeRepository,
        PlainPasswordHasher, RecordingMailer, ScriptedCompletionService,
    },
    ChatTurnService, ChatTurnServiceDependencies, Clock, CreditLedger, HistoryService,
    HistoryServiceDependencies, RequestRateLimiter, RoomService, RoomServiceDependencies,
    SystemClock, UserService, UserServiceDependencies,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use config::{CodeConfig, SiteConfig};
use domain::{RootAccount, Score, User};
use serde_json::Value;
use tower::ServiceExt;
use web_api::{router, AppState, JwtService};

pub const ROOT_EMAIL: &str = "root@example.com";

pub struct TestApp {
    pub router: Router,
    pub jwt: Arc<JwtService>,
    pub users: Arc<InMemoryUserRepository>,
    pub turns: Arc<InMemoryChatTurnRepository>,
    pub codes: Arc<InMemoryVerificationCodeRepository>,
    pub mailer: Arc<RecordingMailer>,
    pub completion: Arc<ScriptedCompletionService>,
}

pub struct TestAppBuilder {
    completion: ScriptedCompletionService,
    max_request_per_hour: u32,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            completion: ScriptedCompletionService::replying(&["Hel", "lo"], "chatcmpl-1"),
            max_request_per_hour: 0,
        }
    }
}

impl TestAppBuilder {
    pub fn completion(mut self, completion: ScriptedCompletionService) -> Self {
        self.completion = completion;
        self
    }

    pub fn max_request_per_hour(mut self, max: u32) -> Self {
        self.max_request_per_hour = max;
        self
    }

    pub fn build(self) -> TestApp {
        let users = Arc::new(InMemoryUserRepository::new());
        let rooms = Arc::new(InMemoryChatRoomRepository::new());
        let turns = Arc::new(InMemoryChatTurnRepository::new());
        let recharges = Arc::new(InMemoryRechargeRepository::new());
        let codes = Arc::new(InMemoryVerificationCodeRepository::new());
        let mailer = Arc::new(RecordingMailer::new());
        let completion = Arc::new(self.completion);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let root = RootAccount::new(Some(ROOT_EMAIL.into()));

        let room_service = Arc::new(RoomService::new(RoomServiceDependencies {
            room_repository: rooms,
            turn_repository: turns.clone(),
            clock: clock.clone(),
        }));
        let history_service = Arc::new(HistoryService::new(HistoryServiceDependencies {
            room_service: room_service.clone(),
            turn_repository: turns.clone(),
            clock: clock.clone(),
        }));
        let chat_turn_service = Arc::new(ChatTurnService::new(ChatTurnServiceDependencies {
            room_service: room_service.clone(),
            turn_repository: turns.clone(),
            completion: completion.clone(),
            ledger: Arc::new(CreditLedger::new(users.clone(), root.clone())),
            clock: clock.clone(),
            settings: ChatSettings {
                system_message: "be brief".into(),
                context_depth: 8,
            },
        }));
        let user_service = Arc::new(UserService::new(UserServiceDependencies {
            user_repository: users.clone(),
            code_repository: codes.clone(),
            recharge_repository: recharges,
            password_hasher: Arc::new(PlainPasswordHasher),
            mailer: mailer.clone(),
            clock,
            settings: AccountSettings {
                site: SiteConfig::default(),
                codes: CodeConfig::default(),
                root,
            },
        }));
        let jwt = Arc::new(JwtService::new("integration-test-secret", 1));

        let state = AppState {
            user_service,
            room_service,
            history_service,
            chat_turn_service,
            completion: completion.clone(),
            rate_limiter: Arc::new(RequestRateLimiter::per_hour(self.max_request_per_hour)),
            jwt_service: jwt.clone(),
        };

        TestApp {
            router: router(state),
            jwt,
            users,
            turns,
            codes,
            mailer,
            completion,
        }
    }
}

impl TestApp {
    pub fn new() -> Self {
        TestAppBuilder::default().build()
    }

    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    /// 插入一个已验证用户并签发令牌
    pub async fn signed_in(&self, email: &str, score: Score) -> (User, String) {
        let user = sample_user(email, score);
        self.users.insert(user.clone()).await;
        let token = self
            .jwt
            .issue(&user, email.eq_ignore_ascii_case(ROOT_EMAIL))
            .expect("issue token");
        (user, token)
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn post_json(&self, uri: &str, token: Option<&str>, body: Value) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).expect("request"))
            .await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).expect("request")).await
    }

    pub async fn create_room(&self, token: &str, room_id: i64) {
        let response = self
            .post_json(
                "/room-create",
                Some(token),
                serde_json::json!({ "title": "New Chat", "roomId": room_id }),
            )
            .await;
        let body = json_body(response).await;
        assert_eq!(body["status"], "Success", "room-create failed: {body}");
    }
}

pub async fn text_body(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn json_body(response: Response) -> Value {
    let text = text_body(response).await;
    serde_json::from_str(&text).unwrap_or_else(|err| panic!("invalid json {text:?}: {err}"))
}
