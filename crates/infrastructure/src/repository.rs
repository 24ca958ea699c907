use std::sync::Arc;

use application::{
    ChatRoomRepository, ChatTurnRepository, RechargeRepository, UserRepository,
    VerificationCodeRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatOptions, ChatRoom, ChatTurn, CodePurpose, PasswordHash, Recharge, RepositoryError,
    RoomId, RoomKey, RoomStatus, Score, Timestamp, TokenUsage, TurnId, TurnStatus, TurnUuid,
    User, UserEmail, UserId, UserStatus, VerificationCode,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return RepositoryError::Conflict;
        }
    }
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const USER_COLUMNS: &str = "id, email, password_hash, open_id, union_id, name, avatar, \
     description, score, status, created_at, verified_at";

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    email: Option<String>,
    password_hash: Option<String>,
    open_id: Option<String>,
    union_id: Option<String>,
    name: Option<String>,
    avatar: Option<String>,
    description: Option<String>,
    score: i64,
    status: i16,
    created_at: DateTime<Utc>,
    verified_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let email = value
            .email
            .map(UserEmail::parse)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;
        let password = value
            .password_hash
            .map(PasswordHash::new)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;
        let status = UserStatus::from_ordinal(value.status)
            .ok_or_else(|| invalid_data(format!("unknown user status {}", value.status)))?;

        Ok(User {
            id: UserId::from(value.id),
            email,
            password,
            open_id: value.open_id,
            union_id: value.union_id,
            name: value.name,
            avatar: value.avatar,
            description: value.description,
            score: value.score,
            status,
            created_at: value.created_at,
            verified_at: value.verified_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    user_id: Uuid,
    room_id: i64,
    title: String,
    status: i16,
    created_at: DateTime<Utc>,
}

impl TryFrom<RoomRecord> for ChatRoom {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let status = RoomStatus::from_ordinal(value.status)
            .ok_or_else(|| invalid_data(format!("unknown room status {}", value.status)))?;
        Ok(ChatRoom {
            user_id: UserId::from(value.user_id),
            room_id: RoomId(value.room_id),
            title: value.title,
            status,
            created_at: value.created_at,
        })
    }
}

const TURN_COLUMNS: &str = "id, user_id, room_id, uuid, prompt, response, status, \
     parent_message_id, message_id, prompt_tokens, completion_tokens, total_tokens, \
     usage_estimated, created_at";

#[derive(Debug, FromRow)]
struct TurnRecord {
    id: Uuid,
    user_id: Uuid,
    room_id: i64,
    uuid: i64,
    prompt: String,
    response: Option<String>,
    status: i16,
    parent_message_id: Option<String>,
    message_id: Option<String>,
    prompt_tokens: Option<i32>,
    completion_tokens: Option<i32>,
    total_tokens: Option<i32>,
    usage_estimated: Option<bool>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TurnRecord> for ChatTurn {
    type Error = RepositoryError;

    fn try_from(value: TurnRecord) -> Result<Self, Self::Error> {
        let status = TurnStatus::from_ordinal(value.status)
            .ok_or_else(|| invalid_data(format!("unknown turn status {}", value.status)))?;
        let usage = match (value.prompt_tokens, value.completion_tokens, value.total_tokens) {
            (Some(prompt), Some(completion), Some(total)) => Some(TokenUsage {
                prompt_tokens: token_count(prompt),
                completion_tokens: token_count(completion),
                total_tokens: token_count(total),
                estimated: value.usage_estimated.unwrap_or(false),
            }),
            _ => None,
        };

        Ok(ChatTurn {
            id: TurnId::from(value.id),
            room: RoomKey::new(UserId::from(value.user_id), RoomId(value.room_id)),
            uuid: TurnUuid(value.uuid),
            prompt: value.prompt,
            response: value.response,
            status,
            options: ChatOptions {
                parent_message_id: value.parent_message_id,
                message_id: value.message_id,
                usage,
            },
            created_at: value.created_at,
        })
    }
}

fn token_count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn token_column(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[derive(Debug, FromRow)]
struct RechargeRecord {
    id: Uuid,
    user_id: Uuid,
    amount: i64,
    payment_method: String,
    transaction_id: String,
    remark: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RechargeRecord> for Recharge {
    fn from(value: RechargeRecord) -> Self {
        Recharge {
            id: value.id,
            user_id: UserId::from(value.user_id),
            amount: value.amount,
            payment_method: value.payment_method,
            transaction_id: value.transaction_id,
            remark: value.remark,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct CodeRecord {
    key: String,
    purpose: String,
    code: String,
    expires_at: DateTime<Utc>,
}

impl TryFrom<CodeRecord> for VerificationCode {
    type Error = RepositoryError;

    fn try_from(value: CodeRecord) -> Result<Self, Self::Error> {
        let purpose = CodePurpose::parse(&value.purpose)
            .ok_or_else(|| invalid_data(format!("unknown code purpose {}", value.purpose)))?;
        Ok(VerificationCode::new(
            value.key,
            purpose,
            value.code,
            value.expires_at,
        ))
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, open_id, union_id, name, avatar,
                               description, score, status, created_at, verified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(user.id))
        .bind(user.email.as_ref().map(UserEmail::as_str))
        .bind(user.password.as_ref().map(PasswordHash::as_str))
        .bind(user.open_id.as_deref())
        .bind(user.union_id.as_deref())
        .bind(user.name.as_deref())
        .bind(user.avatar.as_deref())
        .bind(user.description.as_deref())
        .bind(user.score)
        .bind(user.status.ordinal())
        .bind(user.created_at)
        .bind(user.verified_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, open_id = $4, union_id = $5, name = $6,
                avatar = $7, description = $8, score = $9, status = $10, verified_at = $11
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(user.id))
        .bind(user.email.as_ref().map(UserEmail::as_str))
        .bind(user.password.as_ref().map(PasswordHash::as_str))
        .bind(user.open_id.as_deref())
        .bind(user.union_id.as_deref())
        .bind(user.name.as_deref())
        .bind(user.avatar.as_deref())
        .bind(user.description.as_deref())
        .bind(user.score)
        .bind(user.status.ordinal())
        .bind(user.verified_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn compare_and_set_score(
        &self,
        id: UserId,
        expected: Score,
        score: Score,
        status: UserStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE users SET score = $3, status = $4 WHERE id = $1 AND score = $2",
        )
        .bind(Uuid::from(id))
        .bind(expected)
        .bind(score)
        .bind(status.ordinal())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // 区分用户不存在和余额已被并发修改
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if exists == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(false)
    }

    async fn add_score(&self, id: UserId, amount: Score) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            UPDATE users
            SET score = GREATEST(score + $2, 0),
                status = CASE WHEN status = $3 AND score + $2 > 0 THEN $4 ELSE status END
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(amount)
        .bind(UserStatus::NoScore.ordinal())
        .bind(UserStatus::Normal.ordinal())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        User::try_from(record)
    }
}

#[derive(Clone)]
pub struct PgChatRoomRepository {
    pool: PgPool,
}

impl PgChatRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRoomRepository for PgChatRoomRepository {
    async fn create(&self, room: ChatRoom) -> Result<ChatRoom, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            INSERT INTO chat_rooms (user_id, room_id, title, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING user_id, room_id, title, status, created_at
            "#,
        )
        .bind(Uuid::from(room.user_id))
        .bind(room.room_id.value())
        .bind(&room.title)
        .bind(room.status.ordinal())
        .bind(room.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        ChatRoom::try_from(record)
    }

    async fn find(&self, key: RoomKey) -> Result<Option<ChatRoom>, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT user_id, room_id, title, status, created_at
            FROM chat_rooms
            WHERE user_id = $1 AND room_id = $2
            "#,
        )
        .bind(Uuid::from(key.user_id))
        .bind(key.room_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(ChatRoom::try_from).transpose()
    }

    async fn list_active(&self, user_id: UserId) -> Result<Vec<ChatRoom>, RepositoryError> {
        let records = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT user_id, room_id, title, status, created_at
            FROM chat_rooms
            WHERE user_id = $1 AND status = $2
            ORDER BY created_at ASC, room_id ASC
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(RoomStatus::Normal.ordinal())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatRoom::try_from).collect()
    }

    async fn rename(&self, key: RoomKey, title: &str) -> Result<ChatRoom, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            UPDATE chat_rooms SET title = $3
            WHERE user_id = $1 AND room_id = $2
            RETURNING user_id, room_id, title, status, created_at
            "#,
        )
        .bind(Uuid::from(key.user_id))
        .bind(key.room_id.value())
        .bind(title)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        ChatRoom::try_from(record)
    }

    async fn mark_deleted(&self, key: RoomKey) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE chat_rooms SET status = $3 WHERE user_id = $1 AND room_id = $2")
                .bind(Uuid::from(key.user_id))
                .bind(key.room_id.value())
                .bind(RoomStatus::Deleted.ordinal())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_all_deleted(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("UPDATE chat_rooms SET status = $2 WHERE user_id = $1 AND status <> $2")
                .bind(Uuid::from(user_id))
                .bind(RoomStatus::Deleted.ordinal())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgChatTurnRepository {
    pool: PgPool,
}

impl PgChatTurnRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatTurnRepository for PgChatTurnRepository {
    async fn insert(&self, turn: ChatTurn) -> Result<ChatTurn, RepositoryError> {
        let usage = turn.options.usage;
        let record = sqlx::query_as::<_, TurnRecord>(&format!(
            r#"
            INSERT INTO chat_turns (id, user_id, room_id, uuid, prompt, response, status,
                                    parent_message_id, message_id, prompt_tokens,
                                    completion_tokens, total_tokens, usage_estimated, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {TURN_COLUMNS}
            "#
        ))
        .bind(Uuid::from(turn.id))
        .bind(Uuid::from(turn.room.user_id))
        .bind(turn.room.room_id.value())
        .bind(turn.uuid.value())
        .bind(&turn.prompt)
        .bind(turn.response.as_deref())
        .bind(turn.status.ordinal())
        .bind(turn.options.parent_message_id.as_deref())
        .bind(turn.options.message_id.as_deref())
        .bind(usage.map(|u| token_column(u.prompt_tokens)))
        .bind(usage.map(|u| token_column(u.completion_tokens)))
        .bind(usage.map(|u| token_column(u.total_tokens)))
        .bind(usage.map(|u| u.estimated))
        .bind(turn.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        ChatTurn::try_from(record)
    }

    async fn find(&self, key: RoomKey, uuid: TurnUuid) -> Result<Option<ChatTurn>, RepositoryError> {
        let record = sqlx::query_as::<_, TurnRecord>(&format!(
            "SELECT {TURN_COLUMNS} FROM chat_turns WHERE user_id = $1 AND room_id = $2 AND uuid = $3"
        ))
        .bind(Uuid::from(key.user_id))
        .bind(key.room_id.value())
        .bind(uuid.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(ChatTurn::try_from).transpose()
    }

    async fn find_by_message_id(
        &self,
        key: RoomKey,
        message_id: &str,
    ) -> Result<Option<ChatTurn>, RepositoryError> {
        let record = sqlx::query_as::<_, TurnRecord>(&format!(
            r#"
            SELECT {TURN_COLUMNS} FROM chat_turns
            WHERE user_id = $1 AND room_id = $2 AND message_id = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(Uuid::from(key.user_id))
        .bind(key.room_id.value())
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(ChatTurn::try_from).transpose()
    }

    async fn finalize(
        &self,
        key: RoomKey,
        uuid: TurnUuid,
        response: &str,
        message_id: &str,
        usage: TokenUsage,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_turns
            SET response = $4, message_id = $5, prompt_tokens = $6, completion_tokens = $7,
                total_tokens = $8, usage_estimated = $9
            WHERE user_id = $1 AND room_id = $2 AND uuid = $3
            "#,
        )
        .bind(Uuid::from(key.user_id))
        .bind(key.room_id.value())
        .bind(uuid.value())
        .bind(response)
        .bind(message_id)
        .bind(token_column(usage.prompt_tokens))
        .bind(token_column(usage.completion_tokens))
        .bind(token_column(usage.total_tokens))
        .bind(usage.estimated)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn set_status(
        &self,
        key: RoomKey,
        uuid: TurnUuid,
        status: TurnStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE chat_turns SET status = $4 WHERE user_id = $1 AND room_id = $2 AND uuid = $3",
        )
        .bind(Uuid::from(key.user_id))
        .bind(key.room_id.value())
        .bind(uuid.value())
        .bind(status.ordinal())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_room_deleted(&self, key: RoomKey) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE chat_turns SET status = $3 WHERE user_id = $1 AND room_id = $2 AND status <> $3",
        )
        .bind(Uuid::from(key.user_id))
        .bind(key.room_id.value())
        .bind(TurnStatus::Deleted.ordinal())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn mark_all_deleted(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("UPDATE chat_turns SET status = $2 WHERE user_id = $1 AND status <> $2")
                .bind(Uuid::from(user_id))
                .bind(TurnStatus::Deleted.ordinal())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn list_before(
        &self,
        key: RoomKey,
        before: TurnUuid,
        limit: u32,
    ) -> Result<Vec<ChatTurn>, RepositoryError> {
        let records = sqlx::query_as::<_, TurnRecord>(&format!(
            r#"
            SELECT {TURN_COLUMNS} FROM chat_turns
            WHERE user_id = $1 AND room_id = $2 AND uuid < $3 AND status <> $4
            ORDER BY created_at DESC, uuid DESC
            LIMIT $5
            "#
        ))
        .bind(Uuid::from(key.user_id))
        .bind(key.room_id.value())
        .bind(before.value())
        .bind(TurnStatus::Deleted.ordinal())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // 查询取最近的若干条，返回前恢复为时间升序
        let mut turns = records
            .into_iter()
            .map(ChatTurn::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }
}

#[derive(Clone)]
pub struct PgRechargeRepository {
    pool: PgPool,
}

impl PgRechargeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RechargeRepository for PgRechargeRepository {
    async fn append(&self, recharge: Recharge) -> Result<Recharge, RepositoryError> {
        let record = sqlx::query_as::<_, RechargeRecord>(
            r#"
            INSERT INTO recharges (id, user_id, amount, payment_method, transaction_id, remark, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, amount, payment_method, transaction_id, remark, created_at
            "#,
        )
        .bind(recharge.id)
        .bind(Uuid::from(recharge.user_id))
        .bind(recharge.amount)
        .bind(&recharge.payment_method)
        .bind(&recharge.transaction_id)
        .bind(recharge.remark.as_deref())
        .bind(recharge.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Recharge>, RepositoryError> {
        let records = sqlx::query_as::<_, RechargeRecord>(
            r#"
            SELECT id, user_id, amount, payment_method, transaction_id, remark, created_at
            FROM recharges
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Recharge::from).collect())
    }
}

#[derive(Clone)]
pub struct PgVerificationCodeRepository {
    pool: PgPool,
}

impl PgVerificationCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationCodeRepository for PgVerificationCodeRepository {
    async fn put(&self, code: VerificationCode) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO verification_codes (key, purpose, code, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key, purpose)
            DO UPDATE SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&code.key)
        .bind(code.purpose.as_str())
        .bind(&code.code)
        .bind(code.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn find(
        &self,
        key: &str,
        purpose: CodePurpose,
        now: Timestamp,
    ) -> Result<Option<VerificationCode>, RepositoryError> {
        let record = sqlx::query_as::<_, CodeRecord>(
            r#"
            SELECT key, purpose, code, expires_at FROM verification_codes
            WHERE key = $1 AND purpose = $2 AND expires_at > $3
            "#,
        )
        .bind(key.trim().to_lowercase())
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(VerificationCode::try_from).transpose()
    }

    async fn remove(&self, key: &str, purpose: CodePurpose) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM verification_codes WHERE key = $1 AND purpose = $2")
            .bind(key.trim().to_lowercase())
            .bind(purpose.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(())
    }

    async fn take_by_code(
        &self,
        code: &str,
        purpose: CodePurpose,
        now: Timestamp,
    ) -> Result<Option<VerificationCode>, RepositoryError> {
        let record = sqlx::query_as::<_, CodeRecord>(
            r#"
            DELETE FROM verification_codes
            WHERE code = $1 AND purpose = $2
            RETURNING key, purpose, code, expires_at
            "#,
        )
        .bind(code)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // 过期的验证码同样删除，但不返回
        Ok(record
            .map(VerificationCode::try_from)
            .transpose()?
            .filter(|found| !found.is_expired(now)))
    }
}

/// Postgres 仓储集合。
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub room_repository: Arc<PgChatRoomRepository>,
    pub turn_repository: Arc<PgChatTurnRepository>,
    pub recharge_repository: Arc<PgRechargeRepository>,
    pub code_repository: Arc<PgVerificationCodeRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            room_repository: Arc::new(PgChatRoomRepository::new(pool.clone())),
            turn_repository: Arc::new(PgChatTurnRepository::new(pool.clone())),
            recharge_repository: Arc::new(PgRechargeRepository::new(pool.clone())),
            code_repository: Arc::new(PgVerificationCodeRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
