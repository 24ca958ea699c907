//! 对话处理流程
//!
//! 归属检查 -> 扣费 -> 创建或读取对话记录 -> 调用模型并转发增量结果 -> 写入最终回答。
//! 模型调用在独立任务中进行，客户端断开后任务继续运行直到模型返回并完成落库。

use std::sync::Arc;

use domain::{
    ChatTurn, DebitOutcome, DomainError, RoomKey, TurnId, TurnStatus, TurnUuid, UserId,
};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    completion::{
        ChatMessage, CompletionError, CompletionEvent, CompletionRequest, CompletionService,
        ContextMessage, Role,
    },
    error::ApplicationError,
    repository::ChatTurnRepository,
    services::{credit_ledger::CreditLedger, room_service::RoomService},
};

/// 转发通道容量
const FRAGMENT_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub struct ChatProcessRequest {
    pub user_id: UserId,
    pub room_id: i64,
    pub uuid: i64,
    pub regenerate: bool,
    pub prompt: String,
    pub parent_message_id: Option<String>,
    pub system_message: Option<String>,
}

/// 余额不足时返回的固定消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditDeniedReply {
    pub id: String,
    pub text: String,
    pub parent_message_id: String,
}

impl CreditDeniedReply {
    pub fn no_points() -> Self {
        Self {
            id: "200".into(),
            text: "当前账户没有积分|No points".into(),
            parent_message_id: "200".into(),
        }
    }
}

/// 推送给客户端的一个片段
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    Partial(ChatMessage),
    /// 终止片段，携带模型或存储返回的错误信息
    Failed { message: String },
}

pub type FragmentStream = ReceiverStream<StreamFragment>;

pub enum TurnReply {
    CreditDenied(CreditDeniedReply),
    Streaming(FragmentStream),
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub system_message: String,
    /// 回放的历史轮数上限
    pub context_depth: usize,
}

pub struct ChatTurnServiceDependencies {
    pub room_service: Arc<RoomService>,
    pub turn_repository: Arc<dyn ChatTurnRepository>,
    pub completion: Arc<dyn CompletionService>,
    pub ledger: Arc<CreditLedger>,
    pub clock: Arc<dyn Clock>,
    pub settings: ChatSettings,
}

pub struct ChatTurnService {
    deps: ChatTurnServiceDependencies,
}

impl ChatTurnService {
    pub fn new(deps: ChatTurnServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn process(&self, request: ChatProcessRequest) -> Result<TurnReply, ApplicationError> {
        let key = self
            .deps
            .room_service
            .ensure_owned(request.user_id, request.room_id)
            .await?;
        let uuid = TurnUuid(request.uuid);

        let existing = self.deps.turn_repository.find(key, uuid).await?;
        let existing = match (request.regenerate, existing) {
            (true, Some(turn)) if turn.status == TurnStatus::Deleted => {
                return Err(DomainError::RoomNotFound.into())
            }
            (true, Some(turn)) => Some(turn),
            (true, None) => return Err(DomainError::RoomNotFound.into()),
            (false, Some(_)) => {
                return Err(DomainError::invalid_argument("uuid", "turn already exists").into())
            }
            (false, None) => {
                if request.prompt.trim().is_empty() {
                    return Err(DomainError::invalid_argument("prompt", "cannot be empty").into());
                }
                None
            }
        };

        if let DebitOutcome::Denied = self.deps.ledger.debit(request.user_id).await? {
            return Ok(TurnReply::CreditDenied(CreditDeniedReply::no_points()));
        }

        let turn = match existing {
            Some(turn) => turn,
            None => {
                let turn = ChatTurn::new(
                    TurnId::from(Uuid::new_v4()),
                    key,
                    uuid,
                    request.prompt.clone(),
                    request.parent_message_id.clone(),
                    self.deps.clock.now(),
                )?;
                self.deps.turn_repository.insert(turn).await?
            }
        };

        let parent_message_id = request
            .parent_message_id
            .clone()
            .or_else(|| turn.options.parent_message_id.clone());
        let context = self.build_context(key, parent_message_id.clone()).await?;
        let completion_request = CompletionRequest {
            prompt: turn.prompt.clone(),
            context,
            system_message: Some(
                request
                    .system_message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| self.deps.settings.system_message.clone()),
            ),
            parent_message_id,
        };

        info!(
            room = %key,
            uuid = %uuid,
            regenerate = request.regenerate,
            "dispatching chat turn"
        );

        let (sender, receiver) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(run_turn(
            self.deps.turn_repository.clone(),
            self.deps.completion.clone(),
            key,
            uuid,
            completion_request,
            sender,
        ));
        Ok(TurnReply::Streaming(ReceiverStream::new(receiver)))
    }

    /// 沿 parentMessageId 向上回溯，返回按时间顺序排列的上下文。
    async fn build_context(
        &self,
        key: RoomKey,
        parent_message_id: Option<String>,
    ) -> Result<Vec<ContextMessage>, ApplicationError> {
        let mut messages = Vec::new();
        let mut next = parent_message_id;
        let mut depth = 0;
        while let Some(message_id) = next.take() {
            if depth >= self.deps.settings.context_depth {
                break;
            }
            let Some(turn) = self
                .deps
                .turn_repository
                .find_by_message_id(key, &message_id)
                .await?
            else {
                break;
            };
            if let Some(response) = turn.response {
                messages.push(ContextMessage {
                    role: Role::Assistant,
                    content: response,
                });
            }
            messages.push(ContextMessage {
                role: Role::User,
                content: turn.prompt,
            });
            next = turn.options.parent_message_id;
            depth += 1;
        }
        messages.reverse();
        Ok(messages)
    }
}

async fn run_turn(
    turn_repository: Arc<dyn ChatTurnRepository>,
    completion: Arc<dyn CompletionService>,
    key: RoomKey,
    uuid: TurnUuid,
    request: CompletionRequest,
    sender: mpsc::Sender<StreamFragment>,
) {
    let mut relaying = true;
    let mut stream = match completion.stream(request).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(room = %key, uuid = %uuid, error = %err, "model request failed");
            let _ = sender
                .send(StreamFragment::Failed {
                    message: err.to_string(),
                })
                .await;
            return;
        }
    };

    let mut completed = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(CompletionEvent::Partial(message)) => {
                if relaying && sender.send(StreamFragment::Partial(message)).await.is_err() {
                    relaying = false;
                    info!(room = %key, uuid = %uuid, "client disconnected, finishing turn in background");
                }
            }
            Ok(CompletionEvent::Completed(result)) => {
                completed = Some(result);
                break;
            }
            Err(err) => {
                warn!(room = %key, uuid = %uuid, error = %err, "model stream failed");
                if relaying {
                    let _ = sender
                        .send(StreamFragment::Failed {
                            message: err.to_string(),
                        })
                        .await;
                }
                return;
            }
        }
    }

    let Some(result) = completed else {
        warn!(room = %key, uuid = %uuid, "model stream ended without a result");
        if relaying {
            let _ = sender
                .send(StreamFragment::Failed {
                    message: CompletionError::Incomplete.to_string(),
                })
                .await;
        }
        return;
    };

    match turn_repository
        .finalize(key, uuid, &result.text, &result.message_id, result.usage)
        .await
    {
        Ok(()) => debug!(
            room = %key,
            uuid = %uuid,
            message_id = %result.message_id,
            total_tokens = result.usage.total_tokens,
            "chat turn finalized"
        ),
        Err(err) => {
            error!(room = %key, uuid = %uuid, error = %err, "failed to store chat response");
            if relaying {
                let _ = sender
                    .send(StreamFragment::Failed {
                        message: err.to_string(),
                    })
                    .await;
            }
        }
    }
}
