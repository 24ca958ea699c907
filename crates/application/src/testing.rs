//! 测试用的内存实现

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use domain::{
    ChatRoom, ChatTurn, CodePurpose, PasswordHash, Recharge, RepositoryError, RoomKey,
    RoomStatus, Score, Timestamp, TokenUsage, TurnStatus, TurnUuid, User, UserEmail, UserId,
    UserStatus, VerificationCode,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::Clock;
use crate::completion::{
    ChatMessage, CompletionError, CompletionEvent, CompletionRequest, CompletionResult,
    CompletionService, CompletionSettings, CompletionStream, Role,
};
use crate::mailer::{MailError, Mailer};
use crate::password::{PasswordHasher, PasswordHasherError};
use crate::repository::{
    ChatRoomRepository, ChatTurnRepository, RechargeRepository, UserRepository,
    VerificationCodeRepository,
};

/// 已验证、状态正常的用户
pub fn sample_user(email: &str, score: Score) -> User {
    let mut user = User::register(
        UserId::from(Uuid::new_v4()),
        UserEmail::parse(email).unwrap_or_else(|err| panic!("invalid sample email: {err}")),
        PasswordHash::new("plain:secret").unwrap_or_else(|err| panic!("{err}")),
        score,
        chrono::Utc::now(),
    );
    user.verify(chrono::Utc::now());
    user
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    data: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.data.write().await.insert(Uuid::from(user.id), user);
    }

    pub async fn get(&self, id: UserId) -> Option<User> {
        self.data.read().await.get(&Uuid::from(id)).cloned()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut guard = self.data.write().await;
        let id = Uuid::from(user.id);
        let email_taken = user.email.as_ref().is_some_and(|email| {
            guard
                .values()
                .any(|existing| existing.email.as_ref() == Some(email))
        });
        if guard.contains_key(&id) || email_taken {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let mut guard = self.data.write().await;
        let id = Uuid::from(user.id);
        if !guard.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.data.read().await.get(&Uuid::from(id)).cloned())
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        let guard = self.data.read().await;
        Ok(guard
            .values()
            .find(|user| {
                user.email
                    .as_ref()
                    .is_some_and(|stored| stored.matches(email.as_str()))
            })
            .cloned())
    }

    async fn compare_and_set_score(
        &self,
        id: UserId,
        expected: Score,
        score: Score,
        status: UserStatus,
    ) -> Result<bool, RepositoryError> {
        let mut guard = self.data.write().await;
        let user = guard
            .get_mut(&Uuid::from(id))
            .ok_or(RepositoryError::NotFound)?;
        if user.score != expected {
            return Ok(false);
        }
        user.score = score;
        user.status = status;
        Ok(true)
    }

    async fn add_score(&self, id: UserId, amount: Score) -> Result<User, RepositoryError> {
        let mut guard = self.data.write().await;
        let user = guard
            .get_mut(&Uuid::from(id))
            .ok_or(RepositoryError::NotFound)?;
        user.score = (user.score + amount).max(0);
        user.restore_if_funded();
        Ok(user.clone())
    }
}

#[derive(Default)]
pub struct InMemoryChatRoomRepository {
    rooms: Arc<RwLock<HashMap<RoomKey, ChatRoom>>>,
}

impl InMemoryChatRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: RoomKey) -> Option<ChatRoom> {
        self.rooms.read().await.get(&key).cloned()
    }
}

#[async_trait]
impl ChatRoomRepository for InMemoryChatRoomRepository {
    async fn create(&self, room: ChatRoom) -> Result<ChatRoom, RepositoryError> {
        let mut guard = self.rooms.write().await;
        if guard.contains_key(&room.key()) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(room.key(), room.clone());
        Ok(room)
    }

    async fn find(&self, key: RoomKey) -> Result<Option<ChatRoom>, RepositoryError> {
        Ok(self.rooms.read().await.get(&key).cloned())
    }

    async fn list_active(&self, user_id: UserId) -> Result<Vec<ChatRoom>, RepositoryError> {
        let guard = self.rooms.read().await;
        let mut rooms: Vec<ChatRoom> = guard
            .values()
            .filter(|room| room.user_id == user_id && !room.is_deleted())
            .cloned()
            .collect();
        rooms.sort_by_key(|room| (room.created_at, room.room_id));
        Ok(rooms)
    }

    async fn rename(&self, key: RoomKey, title: &str) -> Result<ChatRoom, RepositoryError> {
        let mut guard = self.rooms.write().await;
        let room = guard.get_mut(&key).ok_or(RepositoryError::NotFound)?;
        room.title = title.to_string();
        Ok(room.clone())
    }

    async fn mark_deleted(&self, key: RoomKey) -> Result<(), RepositoryError> {
        let mut guard = self.rooms.write().await;
        let room = guard.get_mut(&key).ok_or(RepositoryError::NotFound)?;
        room.mark_deleted();
        Ok(())
    }

    async fn mark_all_deleted(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let mut guard = self.rooms.write().await;
        let mut affected = 0;
        for room in guard.values_mut() {
            if room.user_id == user_id && room.status != RoomStatus::Deleted {
                room.mark_deleted();
                affected += 1;
            }
        }
        Ok(affected)
    }
}

#[derive(Default)]
pub struct InMemoryChatTurnRepository {
    turns: Arc<RwLock<HashMap<(RoomKey, TurnUuid), ChatTurn>>>,
}

impl InMemoryChatTurnRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: RoomKey, uuid: TurnUuid) -> Option<ChatTurn> {
        self.turns.read().await.get(&(key, uuid)).cloned()
    }

    /// 房间内的对话数，包括已删除的
    pub async fn count_in_room(&self, key: RoomKey) -> usize {
        self.turns
            .read()
            .await
            .keys()
            .filter(|(room, _)| *room == key)
            .count()
    }
}

#[async_trait]
impl ChatTurnRepository for InMemoryChatTurnRepository {
    async fn insert(&self, turn: ChatTurn) -> Result<ChatTurn, RepositoryError> {
        let mut guard = self.turns.write().await;
        let id = (turn.room, turn.uuid);
        if guard.contains_key(&id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(id, turn.clone());
        Ok(turn)
    }

    async fn find(&self, key: RoomKey, uuid: TurnUuid) -> Result<Option<ChatTurn>, RepositoryError> {
        Ok(self.turns.read().await.get(&(key, uuid)).cloned())
    }

    async fn find_by_message_id(
        &self,
        key: RoomKey,
        message_id: &str,
    ) -> Result<Option<ChatTurn>, RepositoryError> {
        let guard = self.turns.read().await;
        Ok(guard
            .values()
            .find(|turn| {
                turn.room == key && turn.options.message_id.as_deref() == Some(message_id)
            })
            .cloned())
    }

    async fn finalize(
        &self,
        key: RoomKey,
        uuid: TurnUuid,
        response: &str,
        message_id: &str,
        usage: TokenUsage,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.turns.write().await;
        let turn = guard
            .get_mut(&(key, uuid))
            .ok_or(RepositoryError::NotFound)?;
        turn.finalize(response.to_string(), message_id.to_string(), usage);
        Ok(())
    }

    async fn set_status(
        &self,
        key: RoomKey,
        uuid: TurnUuid,
        status: TurnStatus,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.turns.write().await;
        let turn = guard
            .get_mut(&(key, uuid))
            .ok_or(RepositoryError::NotFound)?;
        turn.status = status;
        Ok(())
    }

    async fn mark_room_deleted(&self, key: RoomKey) -> Result<u64, RepositoryError> {
        let mut guard = self.turns.write().await;
        let mut affected = 0;
        for turn in guard.values_mut().filter(|turn| turn.room == key) {
            turn.status = TurnStatus::Deleted;
            affected += 1;
        }
        Ok(affected)
    }

    async fn mark_all_deleted(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let mut guard = self.turns.write().await;
        let mut affected = 0;
        for turn in guard
            .values_mut()
            .filter(|turn| turn.room.user_id == user_id)
        {
            turn.status = TurnStatus::Deleted;
            affected += 1;
        }
        Ok(affected)
    }

    async fn list_before(
        &self,
        key: RoomKey,
        before: TurnUuid,
        limit: u32,
    ) -> Result<Vec<ChatTurn>, RepositoryError> {
        let guard = self.turns.read().await;
        let mut turns: Vec<ChatTurn> = guard
            .values()
            .filter(|turn| turn.room == key && turn.uuid < before && !turn.is_deleted())
            .cloned()
            .collect();
        turns.sort_by(|a, b| (b.created_at, b.uuid).cmp(&(a.created_at, a.uuid)));
        turns.truncate(limit as usize);
        turns.reverse();
        Ok(turns)
    }
}

#[derive(Default)]
pub struct InMemoryRechargeRepository {
    records: Arc<RwLock<Vec<Recharge>>>,
}

impl InMemoryRechargeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RechargeRepository for InMemoryRechargeRepository {
    async fn append(&self, recharge: Recharge) -> Result<Recharge, RepositoryError> {
        self.records.write().await.push(recharge.clone());
        Ok(recharge)
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Recharge>, RepositoryError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryVerificationCodeRepository {
    codes: Arc<RwLock<HashMap<(String, CodePurpose), VerificationCode>>>,
}

impl InMemoryVerificationCodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn peek(&self, key: &str, purpose: CodePurpose) -> Option<VerificationCode> {
        self.codes
            .read()
            .await
            .get(&(key.to_lowercase(), purpose))
            .cloned()
    }
}

#[async_trait]
impl VerificationCodeRepository for InMemoryVerificationCodeRepository {
    async fn put(&self, code: VerificationCode) -> Result<(), RepositoryError> {
        self.codes
            .write()
            .await
            .insert((code.key.clone(), code.purpose), code);
        Ok(())
    }

    async fn find(
        &self,
        key: &str,
        purpose: CodePurpose,
        now: Timestamp,
    ) -> Result<Option<VerificationCode>, RepositoryError> {
        Ok(self
            .codes
            .read()
            .await
            .get(&(key.trim().to_lowercase(), purpose))
            .filter(|code| !code.is_expired(now))
            .cloned())
    }

    async fn remove(&self, key: &str, purpose: CodePurpose) -> Result<(), RepositoryError> {
        self.codes
            .write()
            .await
            .remove(&(key.trim().to_lowercase(), purpose));
        Ok(())
    }

    async fn take_by_code(
        &self,
        code: &str,
        purpose: CodePurpose,
        now: Timestamp,
    ) -> Result<Option<VerificationCode>, RepositoryError> {
        let mut guard = self.codes.write().await;
        let found = guard
            .iter()
            .find(|((_, stored_purpose), stored)| *stored_purpose == purpose && stored.code == code)
            .map(|(id, _)| id.clone());
        Ok(found
            .and_then(|id| guard.remove(&id))
            .filter(|stored| !stored.is_expired(now)))
    }
}

/// 可手动推进的时钟
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|_| chrono::Utc::now())
    }
}

/// 以 `plain:` 前缀存储明文，仅用于测试
#[derive(Default)]
pub struct PlainPasswordHasher;

#[async_trait]
impl PasswordHasher for PlainPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("plain:{plaintext}"))
            .map_err(|err| PasswordHasherError::Hash(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        Ok(hashed.as_str() == format!("plain:{plaintext}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// 只记录不投递的邮件发送器
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<String, MailError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| MailError::Delivery("mailer poisoned".into()))?;
        sent.push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        Ok(format!("mail-{}", sent.len()))
    }
}

/// 按预设脚本回放事件的模型服务
pub struct ScriptedCompletionService {
    script: Vec<Result<CompletionEvent, CompletionError>>,
    refuse: Option<CompletionError>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionService {
    pub fn new(script: Vec<Result<CompletionEvent, CompletionError>>) -> Self {
        Self {
            script,
            refuse: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 逐段推送 `chunks`，累计文本作为最终回答。
    pub fn replying(chunks: &[&str], message_id: &str) -> Self {
        let mut script = partials(chunks, message_id);
        let text: String = chunks.concat();
        script.push(Ok(CompletionEvent::Completed(CompletionResult {
            message_id: message_id.to_string(),
            usage: TokenUsage {
                prompt_tokens: 5,
                completion_tokens: chunks.len() as u32,
                total_tokens: 5 + chunks.len() as u32,
                estimated: false,
            },
            text,
        })));
        Self::new(script)
    }

    /// 推送 `chunks` 后以 `error` 结束。
    pub fn failing_after(chunks: &[&str], error: CompletionError) -> Self {
        let mut script = partials(chunks, "failed");
        script.push(Err(error));
        Self::new(script)
    }

    /// 调用时直接返回错误
    pub fn refusing(error: CompletionError) -> Self {
        let mut service = Self::new(Vec::new());
        service.refuse = Some(error);
        service
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.requests().len()
    }
}

fn partials(chunks: &[&str], message_id: &str) -> Vec<Result<CompletionEvent, CompletionError>> {
    let mut text = String::new();
    chunks
        .iter()
        .map(|chunk| {
            text.push_str(chunk);
            Ok(CompletionEvent::Partial(ChatMessage {
                id: message_id.to_string(),
                text: text.clone(),
                role: Role::Assistant,
                parent_message_id: None,
                delta: Some(chunk.to_string()),
                detail: None,
            }))
        })
        .collect()
}

#[async_trait]
impl CompletionService for ScriptedCompletionService {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, CompletionError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if let Some(error) = &self.refuse {
            return Err(error.clone());
        }
        Ok(Box::pin(futures_util::stream::iter(self.script.clone())))
    }

    fn settings(&self) -> CompletionSettings {
        CompletionSettings {
            model: "scripted".into(),
            base_url: "http://scripted.invalid".into(),
            timeout_ms: 1_000,
            has_api_key: true,
        }
    }
}
