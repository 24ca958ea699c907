use serde::{Deserialize, Serialize};

use crate::value_objects::Timestamp;

/// 验证码用途。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodePurpose {
    /// 注册邮箱验证
    Verify,
    /// 找回密码
    Reset,
}

impl CodePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            CodePurpose::Verify => "verify",
            CodePurpose::Reset => "reset",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "verify" => Some(CodePurpose::Verify),
            "reset" => Some(CodePurpose::Reset),
            _ => None,
        }
    }
}

/// 一次性验证码，`key` 为小写邮箱。同一邮箱同一用途只保留最新的一条。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCode {
    pub key: String,
    pub purpose: CodePurpose,
    pub code: String,
    pub expires_at: Timestamp,
}

impl VerificationCode {
    pub fn new(
        key: impl Into<String>,
        purpose: CodePurpose,
        code: impl Into<String>,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            key: key.into().trim().to_lowercase(),
            purpose,
            code: code.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// 未过期且验证码一致。
    pub fn accepts(&self, code: &str, now: Timestamp) -> bool {
        !self.is_expired(now) && self.code == code.trim()
    }
}
