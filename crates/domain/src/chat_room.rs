use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{RoomId, RoomKey, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    Normal,
    Deleted,
}

impl RoomStatus {
    pub fn ordinal(self) -> i16 {
        match self {
            RoomStatus::Normal => 0,
            RoomStatus::Deleted => 1,
        }
    }

    pub fn from_ordinal(value: i16) -> Option<Self> {
        match value {
            0 => Some(RoomStatus::Normal),
            1 => Some(RoomStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub title: String,
    pub status: RoomStatus,
    pub created_at: Timestamp,
}

impl ChatRoom {
    const MAX_TITLE_CHARS: usize = 200;

    pub fn new(
        user_id: UserId,
        room_id: RoomId,
        title: impl Into<String>,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let title = Self::validate_title(title.into())?;
        Ok(Self {
            user_id,
            room_id,
            title,
            status: RoomStatus::Normal,
            created_at,
        })
    }

    pub fn key(&self) -> RoomKey {
        RoomKey::new(self.user_id, self.room_id)
    }

    pub fn is_deleted(&self) -> bool {
        self.status == RoomStatus::Deleted
    }

    /// 房间存在、未删除且属于该用户。
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id && !self.is_deleted()
    }

    pub fn rename(&mut self, title: impl Into<String>) -> Result<(), DomainError> {
        self.title = Self::validate_title(title.into())?;
        Ok(())
    }

    pub fn mark_deleted(&mut self) {
        self.status = RoomStatus::Deleted;
    }

    pub fn validate_title(title: String) -> Result<String, DomainError> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("title", "cannot be empty"));
        }
        if trimmed.chars().count() > Self::MAX_TITLE_CHARS {
            return Err(DomainError::invalid_argument("title", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn deleted_room_is_not_owned() {
        let owner = UserId::from(Uuid::new_v4());
        let mut room = ChatRoom::new(owner, RoomId(42), "New Chat", Utc::now()).unwrap();
        assert!(room.is_owned_by(owner));
        assert!(!room.is_owned_by(UserId::from(Uuid::new_v4())));

        room.mark_deleted();
        assert!(!room.is_owned_by(owner));
    }

    #[test]
    fn blank_title_is_rejected() {
        let owner = UserId::from(Uuid::new_v4());
        assert!(ChatRoom::new(owner, RoomId(1), "   ", Utc::now()).is_err());
        let room = ChatRoom::new(owner, RoomId(1), "  trip plan ", Utc::now()).unwrap();
        assert_eq!(room.title, "trip plan");
    }
}
