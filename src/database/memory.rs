use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::{
    models::{
        Group, JoinRequest, JoinRequestStatus, Membership, Message, NewGroup, NewMessage, Profile,
    },
    store::{DataStore, FOREIGN_KEY_VIOLATION, StoreError, StoreResult},
};
use crate::realtime::{ChangeEvent, ChangeStream, Notifier, Relation, Row};

/// Store operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertGroup,
    DeleteGroup,
    InsertMembership,
    DeleteMembership,
    InsertJoinRequest,
    TransitionJoinRequest,
    InsertMessage,
}

#[derive(Default)]
struct Tables {
    groups: HashMap<Uuid, Group>,
    memberships: Vec<Membership>,
    join_requests: Vec<JoinRequest>,
    messages: Vec<Message>,
    profiles: HashMap<Uuid, Profile>,
}

/// In-process store with the same constraints as the Postgres schema.
///
/// Used for local development and tests. `fail_next` makes the next calls of
/// an operation fail before touching any data.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    notifier: Notifier,
    failures: Arc<DashMap<StoreOp, u32>>,
}

impl MemoryStore {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            notifier,
            failures: Arc::new(DashMap::new()),
        }
    }

    /// Profiles are written by the auth provider; this stands in for it.
    pub async fn seed_profile(&self, profile: Profile) {
        self.tables
            .write()
            .await
            .profiles
            .insert(profile.user_id, profile);
    }

    /// Make the next `times` calls of `op` fail with a transient error.
    pub fn fail_next(&self, op: StoreOp, times: u32) {
        *self.failures.entry(op).or_insert(0) += times;
    }

    fn take_failure(&self, op: StoreOp) -> StoreResult<()> {
        if let Some(mut remaining) = self.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::new(
                    None,
                    format!("simulated failure in {:?}", op),
                ));
            }
        }
        Ok(())
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Notifier::default())
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn list_groups(&self) -> StoreResult<Vec<Group>> {
        let tables = self.tables.read().await;
        let mut groups: Vec<Group> = tables.groups.values().cloned().collect();
        groups.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(groups)
    }

    async fn get_group(&self, group_id: Uuid) -> StoreResult<Option<Group>> {
        Ok(self.tables.read().await.groups.get(&group_id).cloned())
    }

    async fn insert_group(&self, group: NewGroup) -> StoreResult<Group> {
        self.take_failure(StoreOp::InsertGroup)?;

        let group = Group {
            id: Uuid::now_v7(),
            owner_id: group.owner_id,
            project_name: group.project_name,
            supervisor_name: group.supervisor_name,
            skills_required: group.skills_required,
            skills_needed: group.skills_needed,
            project_outcomes: group.project_outcomes,
            max_members: group.max_members,
            created_at: Utc::now(),
        };

        self.tables
            .write()
            .await
            .groups
            .insert(group.id, group.clone());
        self.notifier
            .publish(ChangeEvent::insert(Row::Group(group.clone())));

        Ok(group)
    }

    async fn delete_group(&self, group_id: Uuid) -> StoreResult<bool> {
        self.take_failure(StoreOp::DeleteGroup)?;

        let removed = {
            let mut tables = self.tables.write().await;
            let removed = tables.groups.remove(&group_id);
            if removed.is_some() {
                tables.memberships.retain(|m| m.group_id != group_id);
                tables.join_requests.retain(|r| r.group_id != group_id);
                tables.messages.retain(|m| m.group_id != group_id);
            }
            removed
        };

        Ok(match removed {
            Some(group) => {
                self.notifier.publish(ChangeEvent::delete(Row::Group(group)));
                true
            }
            None => false,
        })
    }

    async fn list_memberships(&self, group_id: Uuid) -> StoreResult<Vec<Membership>> {
        let tables = self.tables.read().await;
        Ok(tables
            .memberships
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn list_memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        let tables = self.tables.read().await;
        Ok(tables
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn membership_counts(&self) -> StoreResult<HashMap<Uuid, i64>> {
        let tables = self.tables.read().await;
        let mut counts = HashMap::new();
        for membership in &tables.memberships {
            *counts.entry(membership.group_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn insert_membership(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Membership>> {
        self.take_failure(StoreOp::InsertMembership)?;

        let membership = {
            // Count and insert under one write lock
            let mut tables = self.tables.write().await;
            let max_members = tables
                .groups
                .get(&group_id)
                .map(|g| g.max_members)
                .ok_or_else(|| {
                    StoreError::new(
                        Some(FOREIGN_KEY_VIOLATION),
                        format!("group {} does not exist", group_id),
                    )
                })?;

            if tables
                .memberships
                .iter()
                .any(|m| m.group_id == group_id && m.user_id == user_id)
            {
                return Err(StoreError::unique_violation(format!(
                    "user {} is already a member of group {}",
                    user_id, group_id
                )));
            }

            let members = tables
                .memberships
                .iter()
                .filter(|m| m.group_id == group_id)
                .count() as i64;
            if members + 1 >= i64::from(max_members) {
                return Ok(None);
            }

            let membership = Membership {
                group_id,
                user_id,
                created_at: Utc::now(),
            };
            tables.memberships.push(membership.clone());
            membership
        };

        self.notifier
            .publish(ChangeEvent::insert(Row::Membership(membership.clone())));

        Ok(Some(membership))
    }

    async fn delete_membership(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        self.take_failure(StoreOp::DeleteMembership)?;

        let removed = {
            let mut tables = self.tables.write().await;
            let position = tables
                .memberships
                .iter()
                .position(|m| m.group_id == group_id && m.user_id == user_id);
            position.map(|index| tables.memberships.remove(index))
        };

        Ok(match removed {
            Some(membership) => {
                self.notifier
                    .publish(ChangeEvent::delete(Row::Membership(membership)));
                true
            }
            None => false,
        })
    }

    async fn list_join_requests(&self, group_id: Uuid) -> StoreResult<Vec<JoinRequest>> {
        let tables = self.tables.read().await;
        let mut requests: Vec<JoinRequest> = tables
            .join_requests
            .iter()
            .filter(|r| r.group_id == group_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        Ok(requests)
    }

    async fn list_join_requests_for_user(&self, user_id: Uuid) -> StoreResult<Vec<JoinRequest>> {
        let tables = self.tables.read().await;
        let mut requests: Vec<JoinRequest> = tables
            .join_requests
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        Ok(requests)
    }

    async fn get_join_request(&self, request_id: Uuid) -> StoreResult<Option<JoinRequest>> {
        let tables = self.tables.read().await;
        Ok(tables
            .join_requests
            .iter()
            .find(|r| r.id == request_id)
            .cloned())
    }

    async fn insert_join_request(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<JoinRequest> {
        self.take_failure(StoreOp::InsertJoinRequest)?;

        let request = {
            let mut tables = self.tables.write().await;
            if !tables.groups.contains_key(&group_id) {
                return Err(StoreError::new(
                    Some(FOREIGN_KEY_VIOLATION),
                    format!("group {} does not exist", group_id),
                ));
            }

            if tables
                .join_requests
                .iter()
                .any(|r| r.group_id == group_id && r.user_id == user_id && r.is_pending())
            {
                return Err(StoreError::unique_violation(
                    "duplicate key value violates unique constraint \"join_requests_one_pending\"",
                ));
            }

            let request = JoinRequest {
                id: Uuid::now_v7(),
                group_id,
                user_id,
                status: JoinRequestStatus::Pending,
                created_at: Utc::now(),
            };
            tables.join_requests.push(request.clone());
            request
        };

        self.notifier
            .publish(ChangeEvent::insert(Row::JoinRequest(request.clone())));

        Ok(request)
    }

    async fn transition_join_request(
        &self,
        request_id: Uuid,
        status: JoinRequestStatus,
    ) -> StoreResult<Option<JoinRequest>> {
        self.take_failure(StoreOp::TransitionJoinRequest)?;

        let updated = {
            let mut tables = self.tables.write().await;
            tables
                .join_requests
                .iter_mut()
                .find(|r| r.id == request_id && r.is_pending())
                .map(|request| {
                    request.status = status;
                    request.clone()
                })
        };

        if let Some(ref request) = updated {
            self.notifier
                .publish(ChangeEvent::update(Row::JoinRequest(request.clone())));
        }

        Ok(updated)
    }

    async fn list_messages(&self, group_id: Uuid) -> StoreResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect();
        messages.sort_by_key(Message::sort_key);
        Ok(messages)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.take_failure(StoreOp::InsertMessage)?;

        let message = {
            let mut tables = self.tables.write().await;
            if !tables.groups.contains_key(&message.group_id) {
                return Err(StoreError::new(
                    Some(FOREIGN_KEY_VIOLATION),
                    format!("group {} does not exist", message.group_id),
                ));
            }

            let message = Message {
                id: Uuid::now_v7(),
                group_id: message.group_id,
                sender_id: message.sender_id,
                text: message.text,
                created_at: message.created_at,
            };
            tables.messages.push(message.clone());
            message
        };

        self.notifier
            .publish(ChangeEvent::insert(Row::Message(message.clone())));

        Ok(message)
    }

    async fn get_profiles(&self, user_ids: &[Uuid]) -> StoreResult<Vec<Profile>> {
        let tables = self.tables.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| tables.profiles.get(id).cloned())
            .collect())
    }

    async fn subscribe(&self, relation: Relation, group_id: Uuid) -> StoreResult<ChangeStream> {
        Ok(self.notifier.subscribe(relation, group_id))
    }
}
