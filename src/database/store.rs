use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::{
    Group, JoinRequest, JoinRequestStatus, Membership, Message, NewGroup, NewMessage, Profile,
};
use crate::realtime::{ChangeStream, Relation};

/// SQLSTATE for `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for `foreign_key_violation`.
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Failure reported by a storage backend. `code` carries the backend's error
/// code when it has one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", .code.as_ref().map_or(String::new(), |c| format!(" (code {})", c)))]
pub struct StoreError {
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::new(Some(UNIQUE_VIOLATION), message)
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(UNIQUE_VIOLATION)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        let code = match &error {
            sqlx::Error::Database(db_error) => db_error.code().map(|c| c.into_owned()),
            _ => None,
        };

        StoreError {
            code,
            message: error.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage and change feed for groups, memberships, join requests, messages
/// and profiles.
///
/// Every committed mutation is echoed to subscribers of the affected
/// relation and group.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// All groups, newest first.
    async fn list_groups(&self) -> StoreResult<Vec<Group>>;

    async fn get_group(&self, group_id: Uuid) -> StoreResult<Option<Group>>;

    async fn insert_group(&self, group: NewGroup) -> StoreResult<Group>;

    /// Deletes the group together with its memberships, join requests and
    /// messages. Returns `false` when the group did not exist.
    async fn delete_group(&self, group_id: Uuid) -> StoreResult<bool>;

    async fn list_memberships(&self, group_id: Uuid) -> StoreResult<Vec<Membership>>;

    async fn list_memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>>;

    /// Number of membership rows per group. Groups without members are absent.
    async fn membership_counts(&self) -> StoreResult<HashMap<Uuid, i64>>;

    /// Adds a member unless that would take the group past `max_members`
    /// (owner included), in which case `None` is returned and nothing is
    /// written. An existing row for the pair fails with a unique violation.
    async fn insert_membership(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Membership>>;

    /// Returns `false` when there was no such membership.
    async fn delete_membership(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    /// Requests for a group, oldest first.
    async fn list_join_requests(&self, group_id: Uuid) -> StoreResult<Vec<JoinRequest>>;

    async fn list_join_requests_for_user(&self, user_id: Uuid) -> StoreResult<Vec<JoinRequest>>;

    async fn get_join_request(&self, request_id: Uuid) -> StoreResult<Option<JoinRequest>>;

    /// Inserts a `pending` request. A second pending request for the same
    /// pair fails with a unique violation.
    async fn insert_join_request(&self, group_id: Uuid, user_id: Uuid)
    -> StoreResult<JoinRequest>;

    /// Moves a `pending` request to `status`. Returns `None` when the request
    /// does not exist or is no longer pending.
    async fn transition_join_request(
        &self,
        request_id: Uuid,
        status: JoinRequestStatus,
    ) -> StoreResult<Option<JoinRequest>>;

    /// Messages for a group, oldest first with id as tie breaker.
    async fn list_messages(&self, group_id: Uuid) -> StoreResult<Vec<Message>>;

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message>;

    async fn get_profiles(&self, user_ids: &[Uuid]) -> StoreResult<Vec<Profile>>;

    /// Live change feed for one relation of one group. Dropping the stream
    /// ends the subscription.
    async fn subscribe(&self, relation: Relation, group_id: Uuid) -> StoreResult<ChangeStream>;
}
