use async_trait::async_trait;
use domain::{
    ChatRoom, ChatTurn, CodePurpose, Recharge, RepositoryError, RoomKey, Score, Timestamp,
    TokenUsage, TurnStatus, TurnUuid, User, UserEmail, UserId, UserStatus, VerificationCode,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn update(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    /// 大小写不敏感的邮箱查找
    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError>;

    /// 仅当当前余额仍为 `expected` 时写入新余额和状态，返回是否写入成功。
    async fn compare_and_set_score(
        &self,
        id: UserId,
        expected: Score,
        score: Score,
        status: UserStatus,
    ) -> Result<bool, RepositoryError>;

    /// 原子地增加余额；余额变为正数时解除 NoScore。
    async fn add_score(&self, id: UserId, amount: Score) -> Result<User, RepositoryError>;
}

#[async_trait]
pub trait ChatRoomRepository: Send + Sync {
    async fn create(&self, room: ChatRoom) -> Result<ChatRoom, RepositoryError>;
    /// 包括已删除的房间
    async fn find(&self, key: RoomKey) -> Result<Option<ChatRoom>, RepositoryError>;
    /// 未删除的房间，按创建时间升序
    async fn list_active(&self, user_id: UserId) -> Result<Vec<ChatRoom>, RepositoryError>;
    async fn rename(&self, key: RoomKey, title: &str) -> Result<ChatRoom, RepositoryError>;
    async fn mark_deleted(&self, key: RoomKey) -> Result<(), RepositoryError>;
    /// 返回被删除的房间数
    async fn mark_all_deleted(&self, user_id: UserId) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ChatTurnRepository: Send + Sync {
    async fn insert(&self, turn: ChatTurn) -> Result<ChatTurn, RepositoryError>;
    async fn find(&self, key: RoomKey, uuid: TurnUuid) -> Result<Option<ChatTurn>, RepositoryError>;
    /// 按模型消息 ID 查找同一房间内的对话，用于回放上下文
    async fn find_by_message_id(
        &self,
        key: RoomKey,
        message_id: &str,
    ) -> Result<Option<ChatTurn>, RepositoryError>;
    /// 写入最终回答，覆盖之前的回答
    async fn finalize(
        &self,
        key: RoomKey,
        uuid: TurnUuid,
        response: &str,
        message_id: &str,
        usage: TokenUsage,
    ) -> Result<(), RepositoryError>;
    async fn set_status(
        &self,
        key: RoomKey,
        uuid: TurnUuid,
        status: TurnStatus,
    ) -> Result<(), RepositoryError>;
    /// 将房间内所有对话标记为删除，返回影响的行数
    async fn mark_room_deleted(&self, key: RoomKey) -> Result<u64, RepositoryError>;
    /// 将用户所有房间内的对话标记为删除
    async fn mark_all_deleted(&self, user_id: UserId) -> Result<u64, RepositoryError>;
    /// `uuid < before` 且未删除的最近 `limit` 条，按时间升序返回
    async fn list_before(
        &self,
        key: RoomKey,
        before: TurnUuid,
        limit: u32,
    ) -> Result<Vec<ChatTurn>, RepositoryError>;
}

#[async_trait]
pub trait RechargeRepository: Send + Sync {
    async fn append(&self, recharge: Recharge) -> Result<Recharge, RepositoryError>;
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Recharge>, RepositoryError>;
}

/// 带过期时间的一次性验证码存储
#[async_trait]
pub trait VerificationCodeRepository: Send + Sync {
    /// 同一 (key, purpose) 只保留最新一条
    async fn put(&self, code: VerificationCode) -> Result<(), RepositoryError>;
    /// 未过期的验证码
    async fn find(
        &self,
        key: &str,
        purpose: CodePurpose,
        now: Timestamp,
    ) -> Result<Option<VerificationCode>, RepositoryError>;
    async fn remove(&self, key: &str, purpose: CodePurpose) -> Result<(), RepositoryError>;
    /// 按验证码本身取出并删除，用于邮件中的验证链接
    async fn take_by_code(
        &self,
        code: &str,
        purpose: CodePurpose,
        now: Timestamp,
    ) -> Result<Option<VerificationCode>, RepositoryError>;
}
