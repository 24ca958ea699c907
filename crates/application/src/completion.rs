//! 外部模型服务抽象
//!
//! 模型以流的形式返回零个或多个增量结果，最后恰好一个终止事件：
//! `Completed` 或者一个错误。

use std::pin::Pin;

use async_trait::async_trait;
use domain::TokenUsage;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 回放给模型的历史消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub prompt: String,
    /// 按时间顺序排列的历史上下文，不包含本轮提问
    pub context: Vec<ContextMessage>,
    pub system_message: Option<String>,
    pub parent_message_id: Option<String>,
}

/// 推送给客户端的增量消息，`text` 为目前累计的完整文本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub message_id: String,
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    Partial(ChatMessage),
    Completed(CompletionResult),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("model service is not configured: {0}")]
    NotConfigured(String),
    #[error("model service returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("model service request failed: {0}")]
    Transport(String),
    #[error("invalid model service response: {0}")]
    Decode(String),
    #[error("model service stream ended before completion")]
    Incomplete,
}

pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<CompletionEvent, CompletionError>> + Send + 'static>>;

/// 模型服务的运行参数，只用于展示，不包含密钥。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSettings {
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub has_api_key: bool,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, CompletionError>;

    fn settings(&self) -> CompletionSettings;
}

/// 粗略估算 token 数，模型未上报用量时使用。
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}
