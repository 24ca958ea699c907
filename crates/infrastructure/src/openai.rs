//! OpenAI 兼容的流式对话接口
//!
//! 请求 `POST {base_url}/v1/chat/completions`，`stream: true`，
//! 按 SSE 逐条解析 `choices[0].delta.content`，直到 `[DONE]`。

use std::time::Duration;

use application::{
    estimate_tokens, ChatMessage, CompletionError, CompletionEvent, CompletionRequest,
    CompletionResult, CompletionService, CompletionSettings, CompletionStream, Role,
};
use async_trait::async_trait;
use config::OpenAiConfig;
use domain::TokenUsage;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ProviderUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ProviderUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ProviderUsage> for TokenUsage {
    fn from(value: ProviderUsage) -> Self {
        TokenUsage {
            prompt_tokens: value.prompt_tokens,
            completion_tokens: value.completion_tokens,
            total_tokens: value.total_tokens,
            estimated: false,
        }
    }
}

pub struct OpenAiCompletionService {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    timeout_ms: u64,
}

impl OpenAiCompletionService {
    pub fn new(config: &OpenAiConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| CompletionError::Transport(err.to_string()))?;
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| SecretString::from(key.to_owned()));

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(request.context.len() + 2);
        if let Some(system) = request
            .system_message
            .as_deref()
            .filter(|message| !message.trim().is_empty())
        {
            messages.push(json!({ "role": Role::System, "content": system }));
        }
        for message in &request.context {
            messages.push(json!({ "role": message.role, "content": message.content }));
        }
        messages.push(json!({ "role": Role::User, "content": request.prompt }));

        json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        })
    }
}

/// 估算请求侧 token 数：系统消息、历史上下文和本轮提问。
fn estimate_prompt_tokens(request: &CompletionRequest) -> u32 {
    let system = request
        .system_message
        .as_deref()
        .map(estimate_tokens)
        .unwrap_or(0);
    let context: u32 = request
        .context
        .iter()
        .map(|message| estimate_tokens(&message.content))
        .sum();
    system + context + estimate_tokens(&request.prompt)
}

fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.to_owned())
}

#[async_trait]
impl CompletionService for OpenAiCompletionService {
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, CompletionError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| CompletionError::NotConfigured("missing api key".into()))?;

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|err| CompletionError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "model service rejected request");
            return Err(CompletionError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&body),
            });
        }

        let prompt_tokens = estimate_prompt_tokens(&request);
        let parent_message_id = request.parent_message_id;
        let mut events = response.bytes_stream().eventsource();

        Ok(Box::pin(async_stream::try_stream! {
            let mut text = String::new();
            let mut message_id: Option<String> = None;
            let mut usage: Option<ProviderUsage> = None;
            let mut done = false;

            while let Some(event) = events.next().await {
                let event = event.map_err(|err| CompletionError::Transport(err.to_string()))?;
                let data = event.data.trim();
                if data == DONE_SENTINEL {
                    done = true;
                    break;
                }
                if data.is_empty() {
                    continue;
                }

                let raw: Value = serde_json::from_str(data)
                    .map_err(|err| CompletionError::Decode(err.to_string()))?;
                let chunk: StreamChunk = serde_json::from_value(raw.clone())
                    .map_err(|err| CompletionError::Decode(err.to_string()))?;

                if message_id.is_none() {
                    message_id = chunk.id.clone().filter(|id| !id.is_empty());
                }
                if chunk.usage.is_some() {
                    usage = chunk.usage;
                }

                let delta = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty());
                if let Some(delta) = delta {
                    text.push_str(&delta);
                    yield CompletionEvent::Partial(ChatMessage {
                        id: message_id.clone().unwrap_or_default(),
                        text: text.clone(),
                        role: Role::Assistant,
                        parent_message_id: parent_message_id.clone(),
                        delta: Some(delta),
                        detail: Some(raw),
                    });
                }
            }

            if !done {
                Err::<(), _>(CompletionError::Incomplete)?;
            }

            let usage = match usage {
                Some(reported) => TokenUsage::from(reported),
                None => {
                    let completion_tokens = estimate_tokens(&text);
                    TokenUsage {
                        prompt_tokens,
                        completion_tokens,
                        total_tokens: prompt_tokens + completion_tokens,
                        estimated: true,
                    }
                }
            };
            let message_id =
                message_id.unwrap_or_else(|| format!("chatcmpl-{}", Uuid::new_v4().simple()));

            yield CompletionEvent::Completed(CompletionResult {
                message_id,
                text,
                usage,
            });
        }))
    }

    fn settings(&self) -> CompletionSettings {
        CompletionSettings {
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            timeout_ms: self.timeout_ms,
            has_api_key: self.api_key.is_some(),
        }
    }
}
