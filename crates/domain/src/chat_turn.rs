use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{RoomKey, Timestamp, TurnId, TurnUuid};

/// 对话记录状态：提问和回答两半可以分别隐藏。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnStatus {
    Normal,
    Deleted,
    /// 提问一侧已隐藏
    InversionDeleted,
    /// 回答一侧已隐藏
    ResponseDeleted,
}

/// 对话的一半。`Prompt` 对应客户端的 inversion 消息。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnHalf {
    Prompt,
    Response,
}

impl TurnHalf {
    pub fn from_inversion(inversion: bool) -> Self {
        if inversion {
            TurnHalf::Prompt
        } else {
            TurnHalf::Response
        }
    }
}

impl TurnStatus {
    pub fn ordinal(self) -> i16 {
        match self {
            TurnStatus::Normal => 0,
            TurnStatus::Deleted => 1,
            TurnStatus::InversionDeleted => 2,
            TurnStatus::ResponseDeleted => 3,
        }
    }

    pub fn from_ordinal(value: i16) -> Option<Self> {
        match value {
            0 => Some(TurnStatus::Normal),
            1 => Some(TurnStatus::Deleted),
            2 => Some(TurnStatus::InversionDeleted),
            3 => Some(TurnStatus::ResponseDeleted),
            _ => None,
        }
    }

    pub fn shows_prompt(self) -> bool {
        matches!(self, TurnStatus::Normal | TurnStatus::ResponseDeleted)
    }

    pub fn shows_response(self) -> bool {
        matches!(self, TurnStatus::Normal | TurnStatus::InversionDeleted)
    }

    /// 隐藏一半之后的状态；另一半已隐藏时整条记录变为 Deleted。
    pub fn hide(self, half: TurnHalf) -> Self {
        match (self, half) {
            (TurnStatus::Deleted, _) => TurnStatus::Deleted,
            (TurnStatus::InversionDeleted, TurnHalf::Response)
            | (TurnStatus::ResponseDeleted, TurnHalf::Prompt) => TurnStatus::Deleted,
            (_, TurnHalf::Prompt) => TurnStatus::InversionDeleted,
            (_, TurnHalf::Response) => TurnStatus::ResponseDeleted,
        }
    }
}

/// 模型返回的 token 用量。`estimated` 为 true 表示服务端估算而非模型上报。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    /// 上一轮回答的模型消息 ID，用来串联多轮上下文
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    /// 本轮回答的模型消息 ID，完成后写入
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: TurnId,
    pub room: RoomKey,
    pub uuid: TurnUuid,
    pub prompt: String,
    pub response: Option<String>,
    pub status: TurnStatus,
    pub options: ChatOptions,
    pub created_at: Timestamp,
}

impl ChatTurn {
    pub fn new(
        id: TurnId,
        room: RoomKey,
        uuid: TurnUuid,
        prompt: impl Into<String>,
        parent_message_id: Option<String>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(DomainError::invalid_argument("prompt", "cannot be empty"));
        }
        Ok(Self {
            id,
            room,
            uuid,
            prompt,
            response: None,
            status: TurnStatus::Normal,
            options: ChatOptions {
                parent_message_id,
                message_id: None,
                usage: None,
            },
            created_at,
        })
    }

    /// 写入最终回答，重新生成时覆盖旧回答。
    pub fn finalize(&mut self, response: String, message_id: String, usage: TokenUsage) {
        self.response = Some(response);
        self.options.message_id = Some(message_id);
        self.options.usage = Some(usage);
    }

    pub fn hide(&mut self, half: TurnHalf) {
        self.status = self.status.hide(half);
    }

    pub fn is_deleted(&self) -> bool {
        self.status == TurnStatus::Deleted
    }
}
