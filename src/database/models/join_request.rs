use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Profile, macros::string_enum};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub status: JoinRequestStatus,
    pub created_at: DateTime<Utc>,
}

string_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum JoinRequestStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
    }
}

string_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ResolveAction {
        Accept => "accept",
        Reject => "reject",
    }
}

impl ResolveAction {
    pub fn target_status(&self) -> JoinRequestStatus {
        match self {
            ResolveAction::Accept => JoinRequestStatus::Accepted,
            ResolveAction::Reject => JoinRequestStatus::Rejected,
        }
    }
}

impl JoinRequest {
    pub fn is_pending(&self) -> bool {
        self.status == JoinRequestStatus::Pending
    }
}

/// A pending request as shown to the group owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequestView {
    pub request: JoinRequest,
    pub requester: Profile,
}
