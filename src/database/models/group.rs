use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JoinRequestView, Profile, Relationship};

pub const MIN_GROUP_SIZE: i32 = 2;
pub const MAX_GROUP_SIZE: i32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub project_name: String,
    pub supervisor_name: String,
    pub skills_required: Vec<String>,
    pub skills_needed: Vec<String>,
    pub project_outcomes: String,
    pub max_members: i32,          // owner included
    pub created_at: DateTime<Utc>, // TIMESTAMPTZ
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupInput {
    pub project_name: String,
    pub supervisor_name: String,
    #[serde(default)]
    pub skills_required: Vec<String>,
    #[serde(default)]
    pub skills_needed: Vec<String>,
    #[serde(default)]
    pub project_outcomes: Option<String>,
    pub max_members: i32,
}

/// A validated group ready to be written.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub owner_id: Uuid,
    pub project_name: String,
    pub supervisor_name: String,
    pub skills_required: Vec<String>,
    pub skills_needed: Vec<String>,
    pub project_outcomes: String,
    pub max_members: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupQuery {
    pub search: Option<String>,
}

/// Dashboard card.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub group: Group,
    pub owner_name: String,
    pub member_count: i32,
    pub relationship: Relationship,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetail {
    pub group: Group,
    pub owner: Profile,
    pub members: Vec<Profile>,
    pub member_count: i32,
    pub relationship: Relationship,
    /// Only populated for the owner.
    pub pending_requests: Vec<JoinRequestView>,
}

impl Group {
    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    /// Case-insensitive match on names and skills, as the dashboard search does.
    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }

        self.project_name.to_lowercase().contains(&term)
            || self.supervisor_name.to_lowercase().contains(&term)
            || self
                .skills_required
                .iter()
                .chain(self.skills_needed.iter())
                .any(|skill| skill.to_lowercase().contains(&term))
    }
}
