use std::sync::Arc;

use domain::{HistoryPage, TurnUuid, UserId, HISTORY_PAGE_SIZE};

use crate::{
    clock::Clock, error::ApplicationError, repository::ChatTurnRepository,
    services::room_service::RoomService,
};

pub struct HistoryServiceDependencies {
    pub room_service: Arc<RoomService>,
    pub turn_repository: Arc<dyn ChatTurnRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct HistoryService {
    deps: HistoryServiceDependencies,
}

impl HistoryService {
    pub fn new(deps: HistoryServiceDependencies) -> Self {
        Self { deps }
    }

    /// `last_id` 之前最近的一页对话，按时间升序展开；为空时返回占位消息。
    ///
    /// 不属于该用户的房间返回 `RoomNotFound`，由调用方决定如何展示。
    pub async fn list_turns(
        &self,
        user_id: UserId,
        room_id: i64,
        last_id: Option<i64>,
    ) -> Result<HistoryPage, ApplicationError> {
        let key = self.deps.room_service.ensure_owned(user_id, room_id).await?;
        let now = self.deps.clock.now();
        // 对话编号由客户端按毫秒时间戳生成，缺省游标取当前时间
        let before = TurnUuid(last_id.unwrap_or_else(|| now.timestamp_millis()));
        let turns = self
            .deps
            .turn_repository
            .list_before(key, before, HISTORY_PAGE_SIZE)
            .await?;
        Ok(HistoryPage::from_turns(&turns, &now))
    }
}
