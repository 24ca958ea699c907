use std::sync::Arc;

use domain::{
    ChatRoom, DomainError, RepositoryError, RoomId, RoomKey, TurnHalf, TurnUuid, UserId,
};
use tracing::info;

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{ChatRoomRepository, ChatTurnRepository},
};

#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub user_id: UserId,
    pub room_id: i64,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct RenameRoomRequest {
    pub user_id: UserId,
    pub room_id: i64,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct DeleteTurnRequest {
    pub user_id: UserId,
    pub room_id: i64,
    pub uuid: i64,
    /// true 隐藏提问，false 隐藏回答
    pub inversion: bool,
}

pub struct RoomServiceDependencies {
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub turn_repository: Arc<dyn ChatTurnRepository>,
    pub clock: Arc<dyn Clock>,
}

/// 聊天室管理。所有房间级操作先经过归属检查。
pub struct RoomService {
    deps: RoomServiceDependencies,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies) -> Self {
        Self { deps }
    }

    /// 房间存在、未删除且属于该用户时返回 true。
    pub async fn owns_room(&self, user_id: UserId, room_id: RoomId) -> Result<bool, ApplicationError> {
        let room = self
            .deps
            .room_repository
            .find(RoomKey::new(user_id, room_id))
            .await?;
        Ok(room.is_some_and(|room| room.is_owned_by(user_id)))
    }

    /// 归属检查失败时返回 `RoomNotFound`。
    pub async fn ensure_owned(&self, user_id: UserId, room_id: i64) -> Result<RoomKey, ApplicationError> {
        let room_id = RoomId::parse(room_id).map_err(|_| DomainError::RoomNotFound)?;
        if !self.owns_room(user_id, room_id).await? {
            return Err(DomainError::RoomNotFound.into());
        }
        Ok(RoomKey::new(user_id, room_id))
    }

    pub async fn list_rooms(&self, user_id: UserId) -> Result<Vec<ChatRoom>, ApplicationError> {
        Ok(self.deps.room_repository.list_active(user_id).await?)
    }

    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<ChatRoom, ApplicationError> {
        let room_id = RoomId::parse(request.room_id)?;
        let room = ChatRoom::new(request.user_id, room_id, request.title, self.deps.clock.now())?;
        let stored = self
            .deps
            .room_repository
            .create(room)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => ApplicationError::Domain(DomainError::RoomAlreadyExists),
                other => other.into(),
            })?;
        info!(user_id = %stored.user_id, room_id = %stored.room_id, "chat room created");
        Ok(stored)
    }

    pub async fn rename_room(&self, request: RenameRoomRequest) -> Result<ChatRoom, ApplicationError> {
        let key = self.ensure_owned(request.user_id, request.room_id).await?;
        let title = ChatRoom::validate_title(request.title)?;
        Ok(self.deps.room_repository.rename(key, &title).await?)
    }

    /// 删除房间并级联删除其中的对话。
    pub async fn delete_room(&self, user_id: UserId, room_id: i64) -> Result<(), ApplicationError> {
        let key = self.ensure_owned(user_id, room_id).await?;
        self.deps.room_repository.mark_deleted(key).await?;
        let turns = self.deps.turn_repository.mark_room_deleted(key).await?;
        info!(room = %key, turns, "chat room deleted");
        Ok(())
    }

    /// 清空房间内的对话，房间本身保留。
    pub async fn clear_room(&self, user_id: UserId, room_id: i64) -> Result<(), ApplicationError> {
        let key = self.ensure_owned(user_id, room_id).await?;
        let turns = self.deps.turn_repository.mark_room_deleted(key).await?;
        info!(room = %key, turns, "chat room cleared");
        Ok(())
    }

    /// 隐藏一条对话的一半，两半都隐藏后整条记录删除。
    pub async fn delete_turn_half(&self, request: DeleteTurnRequest) -> Result<(), ApplicationError> {
        let key = self.ensure_owned(request.user_id, request.room_id).await?;
        let uuid = TurnUuid(request.uuid);
        let turn = self
            .deps
            .turn_repository
            .find(key, uuid)
            .await?
            .ok_or(DomainError::TurnNotFound)?;
        let status = turn.status.hide(TurnHalf::from_inversion(request.inversion));
        self.deps.turn_repository.set_status(key, uuid, status).await?;
        Ok(())
    }

    /// 删除用户的全部房间和对话。
    pub async fn clear_all(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let rooms = self.deps.room_repository.mark_all_deleted(user_id).await?;
        let turns = self.deps.turn_repository.mark_all_deleted(user_id).await?;
        info!(user_id = %user_id, rooms, turns, "all chat rooms cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::testing::{InMemoryChatRoomRepository, InMemoryChatTurnRepository};
    use chrono::Utc;
    use domain::{ChatTurn, TurnId, TurnStatus};
    use uuid::Uuid;

    struct Fixture {
        service: RoomService,
        rooms: Arc<InMemoryChatRoomRepository>,
        turns: Arc<InMemoryChatTurnRepository>,
        owner: UserId,
    }

    async fn fixture() -> Fixture {
        let rooms = Arc::new(InMemoryChatRoomRepository::new());
        let turns = Arc::new(InMemoryChatTurnRepository::new());
        let service = RoomService::new(RoomServiceDependencies {
            room_repository: rooms.clone(),
            turn_repository: turns.clone(),
            clock: Arc::new(SystemClock),
        });
        let owner = UserId::from(Uuid::new_v4());
        service
            .create_room(CreateRoomRequest {
                user_id: owner,
                room_id: 42,
                title: "New Chat".into(),
            })
            .await
            .unwrap();
        Fixture {
            service,
            rooms,
            turns,
            owner,
        }
    }

    async fn add_turn(fixture: &Fixture, uuid: i64) -> RoomKey {
        let key = RoomKey::new(fixture.owner, RoomId(42));
        let turn = ChatTurn::new(
            TurnId::from(Uuid::new_v4()),
            key,
            TurnUuid(uuid),
            "hello",
            None,
            Utc::now(),
        )
        .unwrap();
        fixture.turns.insert(turn).await.unwrap();
        key
    }

    #[tokio::test]
    async fn other_users_do_not_own_the_room() {
        let fixture = fixture().await;
        assert!(fixture.service.owns_room(fixture.owner, RoomId(42)).await.unwrap());
        let stranger = UserId::from(Uuid::new_v4());
        assert!(!fixture.service.owns_room(stranger, RoomId(42)).await.unwrap());

        let result = fixture
            .service
            .rename_room(RenameRoomRequest {
                user_id: stranger,
                room_id: 42,
                title: "mine".into(),
            })
            .await;
        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::RoomNotFound))
        ));
    }

    #[tokio::test]
    async fn duplicate_room_id_is_rejected() {
        let fixture = fixture().await;
        let result = fixture
            .service
            .create_room(CreateRoomRequest {
                user_id: fixture.owner,
                room_id: 42,
                title: "again".into(),
            })
            .await;
        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::RoomAlreadyExists))
        ));
    }

    #[tokio::test]
    async fn deleting_a_room_cascades_to_turns() {
        let fixture = fixture().await;
        let key = add_turn(&fixture, 1000).await;
        add_turn(&fixture, 1001).await;

        fixture.service.delete_room(fixture.owner, 42).await.unwrap();

        assert!(!fixture.service.owns_room(fixture.owner, RoomId(42)).await.unwrap());
        assert!(fixture.rooms.get(key).await.unwrap().is_deleted());
        for uuid in [1000, 1001] {
            let turn = fixture.turns.get(key, TurnUuid(uuid)).await.unwrap();
            assert_eq!(turn.status, TurnStatus::Deleted);
        }

        let again = fixture.service.delete_room(fixture.owner, 42).await;
        assert!(matches!(
            again,
            Err(ApplicationError::Domain(DomainError::RoomNotFound))
        ));
    }

    #[tokio::test]
    async fn deleting_both_halves_deletes_the_turn() {
        let fixture = fixture().await;
        let key = add_turn(&fixture, 7).await;
        let request = |inversion| DeleteTurnRequest {
            user_id: fixture.owner,
            room_id: 42,
            uuid: 7,
            inversion,
        };

        fixture.service.delete_turn_half(request(false)).await.unwrap();
        assert_eq!(
            fixture.turns.get(key, TurnUuid(7)).await.unwrap().status,
            TurnStatus::ResponseDeleted
        );

        fixture.service.delete_turn_half(request(true)).await.unwrap();
        assert_eq!(
            fixture.turns.get(key, TurnUuid(7)).await.unwrap().status,
            TurnStatus::Deleted
        );
    }

    #[tokio::test]
    async fn clear_all_removes_every_room() {
        let fixture = fixture().await;
        fixture
            .service
            .create_room(CreateRoomRequest {
                user_id: fixture.owner,
                room_id: 43,
                title: "second".into(),
            })
            .await
            .unwrap();
        let key = add_turn(&fixture, 1).await;

        fixture.service.clear_all(fixture.owner).await.unwrap();

        assert!(fixture.service.list_rooms(fixture.owner).await.unwrap().is_empty());
        assert!(fixture.turns.get(key, TurnUuid(1)).await.unwrap().is_deleted());
    }
}
