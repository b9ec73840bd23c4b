use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{
    models::{
        Group, JoinRequest, JoinRequestStatus, Membership, Message, NewGroup, NewMessage, Profile,
    },
    store::{DataStore, FOREIGN_KEY_VIOLATION, StoreError, StoreResult},
    utils::sql,
};
use crate::realtime::{ChangeEvent, ChangeStream, Notifier, Relation, Row};

const GROUP_COLUMNS: &str = r#"
    id,
    owner_id,
    project_name,
    supervisor_name,
    skills_required,
    skills_needed,
    project_outcomes,
    max_members,
    created_at
"#;

const JOIN_REQUEST_COLUMNS: &str = r#"
    id,
    group_id,
    user_id,
    status,
    created_at
"#;

/// Postgres-backed store. Change events are published in-process after each
/// commit.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    notifier: Notifier,
}

impl PgStore {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn list_groups(&self) -> StoreResult<Vec<Group>> {
        let groups = sqlx::query_as::<_, Group>(&sql(&format!(
            "SELECT {} FROM groups ORDER BY created_at DESC, id DESC",
            GROUP_COLUMNS
        )))
        .fetch_all(&self.pool)
        .await?;

        Ok(groups)
    }

    async fn get_group(&self, group_id: Uuid) -> StoreResult<Option<Group>> {
        let group = sqlx::query_as::<_, Group>(&sql(&format!(
            "SELECT {} FROM groups WHERE id = ?",
            GROUP_COLUMNS
        )))
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(group)
    }

    async fn insert_group(&self, group: NewGroup) -> StoreResult<Group> {
        let group = sqlx::query_as::<_, Group>(&sql(&format!(
            r#"
            INSERT INTO
                groups (
                    id,
                    owner_id,
                    project_name,
                    supervisor_name,
                    skills_required,
                    skills_needed,
                    project_outcomes,
                    max_members,
                    created_at
                )
            VALUES
                (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING
                {}
            "#,
            GROUP_COLUMNS
        )))
        .bind(Uuid::now_v7())
        .bind(group.owner_id)
        .bind(group.project_name)
        .bind(group.supervisor_name)
        .bind(group.skills_required)
        .bind(group.skills_needed)
        .bind(group.project_outcomes)
        .bind(group.max_members)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        self.notifier
            .publish(ChangeEvent::insert(Row::Group(group.clone())));

        Ok(group)
    }

    async fn delete_group(&self, group_id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Foreign keys cascade too
        for table in ["messages", "join_requests", "group_members"] {
            sqlx::query(&sql(&format!("DELETE FROM {} WHERE group_id = ?", table)))
                .bind(group_id)
                .execute(&mut *tx)
                .await?;
        }

        let deleted = sqlx::query_as::<_, Group>(&sql(&format!(
            "DELETE FROM groups WHERE id = ? RETURNING {}",
            GROUP_COLUMNS
        )))
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(match deleted {
            Some(group) => {
                self.notifier.publish(ChangeEvent::delete(Row::Group(group)));
                true
            }
            None => false,
        })
    }

    async fn list_memberships(&self, group_id: Uuid) -> StoreResult<Vec<Membership>> {
        let memberships = sqlx::query_as::<_, Membership>(&sql(r#"
            SELECT
                group_id,
                user_id,
                created_at
            FROM
                group_members
            WHERE
                group_id = ?
            ORDER BY
                created_at
        "#))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(memberships)
    }

    async fn list_memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        let memberships = sqlx::query_as::<_, Membership>(&sql(r#"
            SELECT
                group_id,
                user_id,
                created_at
            FROM
                group_members
            WHERE
                user_id = ?
        "#))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(memberships)
    }

    async fn membership_counts(&self) -> StoreResult<HashMap<Uuid, i64>> {
        let rows = sqlx::query_as::<_, (Uuid, i64)>(&sql(r#"
            SELECT
                group_id,
                COUNT(*)
            FROM
                group_members
            GROUP BY
                group_id
        "#))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn insert_membership(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<Membership>> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises concurrent accepts for the same group
        let max_members = sqlx::query_scalar::<_, i32>(&sql(
            "SELECT max_members FROM groups WHERE id = ? FOR UPDATE",
        ))
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            StoreError::new(
                Some(FOREIGN_KEY_VIOLATION),
                format!("group {} does not exist", group_id),
            )
        })?;

        let already_member = sqlx::query_scalar::<_, bool>(&sql(
            "SELECT EXISTS (SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?)",
        ))
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        if already_member {
            tx.rollback().await?;
            return Err(StoreError::unique_violation(format!(
                "user {} is already a member of group {}",
                user_id, group_id
            )));
        }

        let members = sqlx::query_scalar::<_, i64>(&sql(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?",
        ))
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;

        if members + 1 >= i64::from(max_members) {
            tx.rollback().await?;
            return Ok(None);
        }

        let membership = sqlx::query_as::<_, Membership>(&sql(r#"
            INSERT INTO
                group_members (
                    group_id,
                    user_id,
                    created_at
                )
            VALUES
                (?, ?, ?)
            RETURNING
                group_id,
                user_id,
                created_at
        "#))
        .bind(group_id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        self.notifier
            .publish(ChangeEvent::insert(Row::Membership(membership.clone())));

        Ok(Some(membership))
    }

    async fn delete_membership(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let removed = sqlx::query_as::<_, Membership>(&sql(r#"
            DELETE FROM group_members
            WHERE
                group_id = ?
                AND user_id = ?
            RETURNING
                group_id,
                user_id,
                created_at
        "#))
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

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
        let requests = sqlx::query_as::<_, JoinRequest>(&sql(&format!(
            "SELECT {} FROM join_requests WHERE group_id = ? ORDER BY created_at, id",
            JOIN_REQUEST_COLUMNS
        )))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }

    async fn list_join_requests_for_user(&self, user_id: Uuid) -> StoreResult<Vec<JoinRequest>> {
        let requests = sqlx::query_as::<_, JoinRequest>(&sql(&format!(
            "SELECT {} FROM join_requests WHERE user_id = ? ORDER BY created_at, id",
            JOIN_REQUEST_COLUMNS
        )))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }

    async fn get_join_request(&self, request_id: Uuid) -> StoreResult<Option<JoinRequest>> {
        let request = sqlx::query_as::<_, JoinRequest>(&sql(&format!(
            "SELECT {} FROM join_requests WHERE id = ?",
            JOIN_REQUEST_COLUMNS
        )))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    async fn insert_join_request(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<JoinRequest> {
        // join_requests_one_pending (partial unique index) rejects duplicates
        let request = sqlx::query_as::<_, JoinRequest>(&sql(&format!(
            r#"
            INSERT INTO
                join_requests (
                    id,
                    group_id,
                    user_id,
                    status,
                    created_at
                )
            VALUES
                (?, ?, ?, ?, ?)
            RETURNING
                {}
            "#,
            JOIN_REQUEST_COLUMNS
        )))
        .bind(Uuid::now_v7())
        .bind(group_id)
        .bind(user_id)
        .bind(JoinRequestStatus::Pending)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        self.notifier
            .publish(ChangeEvent::insert(Row::JoinRequest(request.clone())));

        Ok(request)
    }

    async fn transition_join_request(
        &self,
        request_id: Uuid,
        status: JoinRequestStatus,
    ) -> StoreResult<Option<JoinRequest>> {
        let request = sqlx::query_as::<_, JoinRequest>(&sql(&format!(
            r#"
            UPDATE
                join_requests
            SET
                status = ?
            WHERE
                id = ?
                AND status = ?
            RETURNING
                {}
            "#,
            JOIN_REQUEST_COLUMNS
        )))
        .bind(status)
        .bind(request_id)
        .bind(JoinRequestStatus::Pending)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref request) = request {
            self.notifier
                .publish(ChangeEvent::update(Row::JoinRequest(request.clone())));
        }

        Ok(request)
    }

    async fn list_messages(&self, group_id: Uuid) -> StoreResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(&sql(r#"
            SELECT
                id,
                group_id,
                sender_id,
                text,
                created_at
            FROM
                messages
            WHERE
                group_id = ?
            ORDER BY
                created_at ASC,
                id ASC
        "#))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        let message = sqlx::query_as::<_, Message>(&sql(r#"
            INSERT INTO
                messages (
                    id,
                    group_id,
                    sender_id,
                    text,
                    created_at
                )
            VALUES
                (?, ?, ?, ?, ?)
            RETURNING
                id,
                group_id,
                sender_id,
                text,
                created_at
        "#))
        .bind(Uuid::now_v7())
        .bind(message.group_id)
        .bind(message.sender_id)
        .bind(message.text)
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await?;

        self.notifier
            .publish(ChangeEvent::insert(Row::Message(message.clone())));

        Ok(message)
    }

    async fn get_profiles(&self, user_ids: &[Uuid]) -> StoreResult<Vec<Profile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = sqlx::query_as::<_, Profile>(&sql(r#"
            SELECT
                user_id,
                name,
                email
            FROM
                profiles
            WHERE
                user_id = ANY(?)
        "#))
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(profiles)
    }

    async fn subscribe(&self, relation: Relation, group_id: Uuid) -> StoreResult<ChangeStream> {
        Ok(self.notifier.subscribe(relation, group_id))
    }
}
