//! 积分扣减规则
//!
//! 每次对话尝试扣一分，扣费发生在调用模型之前，模型调用失败也不退还。
//! 配置的管理员账号不计费。

use crate::user::{User, UserStatus};
use crate::value_objects::Score;

/// 配置中的管理员邮箱。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootAccount {
    email: Option<String>,
}

impl RootAccount {
    pub fn new(email: Option<String>) -> Self {
        let email = email
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        Self { email }
    }

    pub fn is_root_email(&self, email: &str) -> bool {
        self.email
            .as_deref()
            .is_some_and(|root| root.eq_ignore_ascii_case(email.trim()))
    }

    pub fn is_root(&self, user: &User) -> bool {
        user.email
            .as_ref()
            .is_some_and(|email| self.is_root_email(email.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// 允许本次对话；`charged` 为 false 表示管理员账号未扣费
    Allowed { balance: Score, charged: bool },
    /// 余额耗尽，拒绝本次对话
    Denied,
}

impl DebitOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, DebitOutcome::Allowed { .. })
    }
}

/// 在内存中对用户执行一次扣费，调用方负责持久化变更后的余额和状态。
///
/// 余额扣到 0 的那一次仍然放行，同时状态变为 NoScore；之后的尝试被拒绝。
pub fn try_debit(user: &mut User, root: &RootAccount) -> DebitOutcome {
    if root.is_root(user) {
        return DebitOutcome::Allowed {
            balance: user.score,
            charged: false,
        };
    }

    if user.score <= 0 {
        user.score = 0;
        user.status = UserStatus::NoScore;
        return DebitOutcome::Denied;
    }

    let balance = (user.score - 1).max(0);
    user.score = balance;
    if balance == 0 {
        user.status = UserStatus::NoScore;
    }
    DebitOutcome::Allowed {
        balance,
        charged: true,
    }
}
