use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per non-owner member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// How a viewer relates to a group. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Owner,
    Member,
    PendingRequester,
    RejectedRequester,
    Stranger,
}

impl Relationship {
    /// Owners and members may use the group chat.
    pub fn can_chat(&self) -> bool {
        matches!(self, Relationship::Owner | Relationship::Member)
    }
}
