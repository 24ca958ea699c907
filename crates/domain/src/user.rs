use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{PasswordHash, Score, Timestamp, UserEmail, UserId};

/// 用户生命周期状态。
///
/// 序号沿用旧数据中共用的状态序号空间，只取对用户有效的子集。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserStatus {
    Normal,
    Deleted,
    PreVerify,
    AdminVerify,
    NoScore,
}

impl UserStatus {
    pub fn ordinal(self) -> i16 {
        match self {
            UserStatus::Normal => 0,
            UserStatus::Deleted => 1,
            UserStatus::PreVerify => 4,
            UserStatus::AdminVerify => 5,
            UserStatus::NoScore => 6,
        }
    }

    pub fn from_ordinal(value: i16) -> Option<Self> {
        match value {
            0 => Some(UserStatus::Normal),
            // 2/3 是对话半删除状态，旧数据里曾被写到用户上，按已删除处理
            1..=3 => Some(UserStatus::Deleted),
            4 => Some(UserStatus::PreVerify),
            5 => Some(UserStatus::AdminVerify),
            6 => Some(UserStatus::NoScore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: Option<UserEmail>,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: Option<PasswordHash>,
    pub open_id: Option<String>,
    pub union_id: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub description: Option<String>,
    pub score: Score,
    pub status: UserStatus,
    pub created_at: Timestamp,
    pub verified_at: Option<Timestamp>,
}

impl User {
    /// 邮箱注册：初始为待验证状态。
    pub fn register(
        id: UserId,
        email: UserEmail,
        password: PasswordHash,
        score: Score,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            email: Some(email),
            password: Some(password),
            open_id: None,
            union_id: None,
            name: None,
            avatar: None,
            description: None,
            score,
            status: UserStatus::PreVerify,
            created_at: now,
            verified_at: None,
        }
    }

    pub fn verify(&mut self, now: Timestamp) {
        self.status = UserStatus::Normal;
        self.verified_at = Some(now);
    }

    /// 登录前的状态检查，返回给用户的提示与旧系统一致。
    pub fn ensure_can_login(&self) -> Result<(), DomainError> {
        match self.status {
            UserStatus::Normal | UserStatus::NoScore => Ok(()),
            UserStatus::Deleted => Err(DomainError::user_status_rejected(
                "用户无法登录，请联系管理员",
            )),
            UserStatus::PreVerify => Err(DomainError::user_status_rejected("请去邮箱中验证")),
            UserStatus::AdminVerify => {
                Err(DomainError::user_status_rejected("请等待管理员开通"))
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, UserStatus::Normal | UserStatus::NoScore)
    }

    pub fn update_profile(
        &mut self,
        name: Option<String>,
        avatar: Option<String>,
        description: Option<String>,
    ) {
        self.name = name;
        self.avatar = avatar;
        self.description = description;
    }

    pub fn set_password(&mut self, password: PasswordHash) {
        self.password = Some(password);
    }

    /// 直接设置余额；余额恢复为正数时解除 NoScore。
    pub fn set_score(&mut self, score: Score) {
        self.score = score.max(0);
        self.restore_if_funded();
    }

    pub fn restore_if_funded(&mut self) {
        if self.status == UserStatus::NoScore && self.score > 0 {
            self.status = UserStatus::Normal;
        }
    }

    /// 展示名，未设置时退回邮箱。
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.email.as_ref().map(|email| email.to_string()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn pending_user() -> User {
        User::register(
            UserId::from(Uuid::new_v4()),
            UserEmail::parse("bob@example.com").unwrap(),
            PasswordHash::new("hash").unwrap(),
            10,
            Utc::now(),
        )
    }

    #[test]
    fn registered_user_waits_for_verification() {
        let user = pending_user();
        assert_eq!(user.status, UserStatus::PreVerify);
        assert_eq!(
            user.ensure_can_login(),
            Err(DomainError::user_status_rejected("请去邮箱中验证"))
        );
    }

    #[test]
    fn verified_user_can_login() {
        let mut user = pending_user();
        user.verify(Utc::now());
        assert!(user.ensure_can_login().is_ok());
        assert!(user.verified_at.is_some());
    }

    #[test]
    fn funding_lifts_no_score() {
        let mut user = pending_user();
        user.status = UserStatus::NoScore;
        user.set_score(5);
        assert_eq!(user.status, UserStatus::Normal);

        user.status = UserStatus::NoScore;
        user.set_score(0);
        assert_eq!(user.status, UserStatus::NoScore);
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let mut user = pending_user();
        assert_eq!(user.display_name(), "bob@example.com");
        user.name = Some("Bob".into());
        assert_eq!(user.display_name(), "Bob");
    }

    #[test]
    fn ordinals_round_trip() {
        for status in [
            UserStatus::Normal,
            UserStatus::Deleted,
            UserStatus::PreVerify,
            UserStatus::AdminVerify,
            UserStatus::NoScore,
        ] {
            assert_eq!(UserStatus::from_ordinal(status.ordinal()), Some(status));
        }
        assert_eq!(UserStatus::from_ordinal(42), None);
    }
}
