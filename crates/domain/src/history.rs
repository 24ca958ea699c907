//! 历史消息视图
//!
//! 一条对话记录在客户端展开为最多两条消息：提问（inversion）和回答。

use serde::Serialize;

use crate::chat_turn::ChatTurn;
use crate::value_objects::{Timestamp, TurnUuid};

/// 单页最多返回的对话记录数。
pub const HISTORY_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationOptions {
    pub parent_message_id: Option<String>,
}

/// 重新发送时客户端回传的请求参数，提问和回答两侧的字段不同。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RequestOptions {
    Prompt(PromptRequestOptions),
    Response(ResponseRequestOptions),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptRequestOptions {
    pub prompt: String,
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRequestOptions {
    pub prompt: String,
    pub parent_message_id: Option<String>,
}

impl RequestOptions {
    fn prompt_only(prompt: impl Into<String>) -> Self {
        RequestOptions::Prompt(PromptRequestOptions {
            prompt: prompt.into(),
            options: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewTurn {
    pub uuid: TurnUuid,
    pub date_time: String,
    pub text: String,
    pub inversion: bool,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loading: Option<bool>,
    pub conversation_options: Option<ConversationOptions>,
    pub request_options: Option<RequestOptions>,
}

fn format_date_time(ts: &Timestamp) -> String {
    ts.format("%Y/%-m/%-d %H:%M:%S").to_string()
}

impl ViewTurn {
    fn prompt_side(turn: &ChatTurn) -> Self {
        Self {
            uuid: turn.uuid,
            date_time: format_date_time(&turn.created_at),
            text: turn.prompt.clone(),
            inversion: true,
            error: false,
            loading: None,
            conversation_options: None,
            request_options: Some(RequestOptions::prompt_only(turn.prompt.clone())),
        }
    }

    fn response_side(turn: &ChatTurn) -> Self {
        Self {
            uuid: turn.uuid,
            date_time: format_date_time(&turn.created_at),
            text: turn.response.clone().unwrap_or_default(),
            inversion: false,
            error: false,
            loading: Some(false),
            conversation_options: Some(ConversationOptions {
                parent_message_id: turn.options.message_id.clone(),
            }),
            request_options: Some(RequestOptions::Response(ResponseRequestOptions {
                prompt: turn.prompt.clone(),
                parent_message_id: turn.options.parent_message_id.clone(),
            })),
        }
    }

    /// 空房间时返回的占位消息。
    pub fn no_chats(now: &Timestamp) -> Self {
        Self {
            uuid: TurnUuid(3),
            date_time: format_date_time(now),
            text: "暂无对话记录 | No chat history".to_string(),
            inversion: false,
            error: false,
            loading: None,
            conversation_options: None,
            request_options: Some(RequestOptions::prompt_only(String::new())),
        }
    }
}

/// 按原顺序展开对话记录，跳过被隐藏的一半。
pub fn expand_turns(turns: &[ChatTurn]) -> Vec<ViewTurn> {
    let mut rows = Vec::with_capacity(turns.len() * 2);
    for turn in turns {
        if turn.status.shows_prompt() {
            rows.push(ViewTurn::prompt_side(turn));
        }
        if turn.status.shows_response() {
            rows.push(ViewTurn::response_side(turn));
        }
    }
    rows
}

/// 历史查询结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryPage {
    Turns(Vec<ViewTurn>),
    /// 房间里没有可展示的内容
    NoChats(ViewTurn),
}

impl HistoryPage {
    pub fn from_turns(turns: &[ChatTurn], now: &Timestamp) -> Self {
        let rows = expand_turns(turns);
        if rows.is_empty() {
            HistoryPage::NoChats(ViewTurn::no_chats(now))
        } else {
            HistoryPage::Turns(rows)
        }
    }

    pub fn into_rows(self) -> Vec<ViewTurn> {
        match self {
            HistoryPage::Turns(rows) => rows,
            HistoryPage::NoChats(sentinel) => vec![sentinel],
        }
    }
}
