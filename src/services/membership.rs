//! Group ownership, membership and join-request lifecycle.
//!
//! The pure functions at the top work on a [`GroupSnapshot`] the caller owns;
//! [`MembershipEngine`] runs the state transitions against the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::database::{
    DataStore,
    models::{
        CreateGroupInput, Group, GroupDetail, GroupSummary, JoinRequest, JoinRequestStatus,
        JoinRequestView, MAX_GROUP_SIZE, MIN_GROUP_SIZE, Membership, NewGroup, Profile,
        Relationship, ResolveAction,
    },
};
use crate::error::{AppError, AppResult};
use crate::services::profiles::ProfileDirectory;

/// The rows of one group a caller needs to reason about it.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub group: Group,
    pub memberships: Vec<Membership>,
    pub join_requests: Vec<JoinRequest>,
}

impl GroupSnapshot {
    pub fn relationship(&self, viewer_id: Uuid) -> Relationship {
        derive_relationship(
            &self.group,
            &self.memberships,
            &self.join_requests,
            viewer_id,
        )
    }

    pub fn member_count(&self) -> i32 {
        member_count(&self.memberships)
    }

    pub fn pending_requests(&self) -> Vec<JoinRequest> {
        self.join_requests
            .iter()
            .filter(|r| r.is_pending())
            .cloned()
            .collect()
    }
}

/// Relationship of `viewer_id` to `group`, checked in priority order: owner,
/// member, then the status of the viewer's most recent request.
pub fn derive_relationship(
    group: &Group,
    memberships: &[Membership],
    join_requests: &[JoinRequest],
    viewer_id: Uuid,
) -> Relationship {
    if group.owner_id == viewer_id {
        return Relationship::Owner;
    }

    if memberships
        .iter()
        .any(|m| m.group_id == group.id && m.user_id == viewer_id)
    {
        return Relationship::Member;
    }

    let latest = join_requests
        .iter()
        .filter(|r| r.group_id == group.id && r.user_id == viewer_id)
        .max_by_key(|r| (r.created_at, r.id));

    match latest.map(|r| r.status) {
        Some(JoinRequestStatus::Pending) => Relationship::PendingRequester,
        Some(JoinRequestStatus::Rejected) => Relationship::RejectedRequester,
        // Accepted without a membership row: the member was removed
        Some(JoinRequestStatus::Accepted) | None => Relationship::Stranger,
    }
}

/// Owner plus one per membership row.
pub fn member_count(memberships: &[Membership]) -> i32 {
    memberships.len() as i32 + 1
}

fn clean_skills(skills: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    skills
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

/// Checks the group form and normalises it.
pub fn validate_group_input(owner_id: Uuid, input: CreateGroupInput) -> AppResult<NewGroup> {
    let project_name = input.project_name.trim().to_string();
    let project_name_len = project_name.chars().count();
    if project_name_len < 3 {
        return Err(AppError::BadRequest(
            "Project name must be at least 3 characters".to_string(),
        ));
    }
    if project_name_len > 100 {
        return Err(AppError::BadRequest(
            "Project name must be at most 100 characters".to_string(),
        ));
    }

    let supervisor_name = input.supervisor_name.trim().to_string();
    let supervisor_name_len = supervisor_name.chars().count();
    if supervisor_name_len < 2 {
        return Err(AppError::BadRequest("Supervisor name is required".to_string()));
    }
    if supervisor_name_len > 100 {
        return Err(AppError::BadRequest(
            "Supervisor name must be at most 100 characters".to_string(),
        ));
    }

    let project_outcomes = input.project_outcomes.unwrap_or_default().trim().to_string();
    if project_outcomes.chars().count() > 1000 {
        return Err(AppError::BadRequest("Description is too long".to_string()));
    }

    if input.max_members < MIN_GROUP_SIZE {
        return Err(AppError::BadRequest(format!(
            "Minimum {} members",
            MIN_GROUP_SIZE
        )));
    }
    if input.max_members > MAX_GROUP_SIZE {
        return Err(AppError::BadRequest(format!(
            "Maximum {} members",
            MAX_GROUP_SIZE
        )));
    }

    Ok(NewGroup {
        owner_id,
        project_name,
        supervisor_name,
        skills_required: clean_skills(input.skills_required),
        skills_needed: clean_skills(input.skills_needed),
        project_outcomes,
        max_members: input.max_members,
    })
}

#[derive(Clone)]
pub struct MembershipEngine {
    store: Arc<dyn DataStore>,
    profiles: ProfileDirectory,
}

impl MembershipEngine {
    pub fn new(store: Arc<dyn DataStore>, profiles: ProfileDirectory) -> Self {
        Self { store, profiles }
    }

    async fn get_group(&self, group_id: Uuid) -> AppResult<Group> {
        self.store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Group {} not found", group_id)))
    }

    fn require_owner(group: &Group, actor_id: Uuid, action: &str) -> AppResult<()> {
        if group.is_owner(actor_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Only the group owner can {}",
                action
            )))
        }
    }

    pub async fn create_group(&self, owner_id: Uuid, input: CreateGroupInput) -> AppResult<Group> {
        let new_group = validate_group_input(owner_id, input)?;
        let group = self.store.insert_group(new_group).await?;

        log::info!("User {} created group {}", owner_id, group.id);
        Ok(group)
    }

    pub async fn load_snapshot(&self, group_id: Uuid) -> AppResult<GroupSnapshot> {
        let group = self.get_group(group_id).await?;
        let memberships = self.store.list_memberships(group_id).await?;
        let join_requests = self.store.list_join_requests(group_id).await?;

        Ok(GroupSnapshot {
            group,
            memberships,
            join_requests,
        })
    }

    pub async fn relationship(&self, group_id: Uuid, viewer_id: Uuid) -> AppResult<Relationship> {
        Ok(self.load_snapshot(group_id).await?.relationship(viewer_id))
    }

    /// Files a pending request. Requests may queue while the group is full;
    /// capacity is only enforced on acceptance.
    pub async fn request_to_join(&self, group_id: Uuid, viewer_id: Uuid) -> AppResult<JoinRequest> {
        let snapshot = self.load_snapshot(group_id).await?;

        match snapshot.relationship(viewer_id) {
            Relationship::Owner => {
                return Err(AppError::InvalidState(
                    "The owner cannot request to join their own group".to_string(),
                ));
            }
            Relationship::Member => {
                return Err(AppError::InvalidState(
                    "Already a member of this group".to_string(),
                ));
            }
            Relationship::PendingRequester => {
                return Err(AppError::Conflict("Already requested".to_string()));
            }
            Relationship::RejectedRequester | Relationship::Stranger => {}
        }

        match self.store.insert_join_request(group_id, viewer_id).await {
            Ok(request) => {
                log::info!(
                    "User {} requested to join group {} (request {})",
                    viewer_id,
                    group_id,
                    request.id
                );
                Ok(request)
            }
            // Lost a race with another request from the same user
            Err(err) if err.is_unique_violation() => {
                Err(AppError::Conflict("Already requested".to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn resolve_request(
        &self,
        group_id: Uuid,
        request_id: Uuid,
        action: ResolveAction,
        actor_id: Uuid,
    ) -> AppResult<JoinRequest> {
        let group = self.get_group(group_id).await?;
        Self::require_owner(&group, actor_id, "resolve join requests")?;

        let request = self
            .store
            .get_join_request(request_id)
            .await?
            .filter(|r| r.group_id == group.id)
            .ok_or_else(|| AppError::NotFound(format!("Join request {} not found", request_id)))?;

        if !request.is_pending() {
            return Err(AppError::InvalidState(format!(
                "Join request is already {}",
                request.status
            )));
        }

        let resolved = match action {
            ResolveAction::Accept => self.accept(&group, &request).await?,
            ResolveAction::Reject => self
                .store
                .transition_join_request(request.id, JoinRequestStatus::Rejected)
                .await?
                .ok_or_else(|| {
                    AppError::InvalidState("Join request is no longer pending".to_string())
                })?,
        };

        log::info!(
            "Owner {} marked join request {} ({}) from user {} for group {} as {}",
            actor_id,
            resolved.id,
            action,
            resolved.user_id,
            group.id,
            resolved.status
        );
        Ok(resolved)
    }

    /// Two writes without a shared transaction: membership first, then the
    /// request status. Each is retried once; if the status never lands the
    /// membership added here is removed again.
    async fn accept(&self, group: &Group, request: &JoinRequest) -> AppResult<JoinRequest> {
        let inserted = self.add_member(group, request.user_id).await?;

        match self.mark_accepted(request.id).await {
            Ok(accepted) => Ok(accepted),
            Err(err) => {
                if inserted {
                    log::warn!(
                        "Rolling back membership of user {} in group {} after failed accept: {}",
                        request.user_id,
                        group.id,
                        err
                    );
                    if let Err(rollback_err) =
                        self.store.delete_membership(group.id, request.user_id).await
                    {
                        log::error!(
                            "Rollback failed after error (orig: {}, rollback: {})",
                            err,
                            rollback_err
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Returns whether this call created the membership row. An existing row
    /// means an earlier accept got halfway and is being completed now.
    async fn add_member(&self, group: &Group, user_id: Uuid) -> AppResult<bool> {
        let mut retried = false;
        loop {
            match self.store.insert_membership(group.id, user_id).await {
                Ok(Some(_)) => return Ok(true),
                Ok(None) => {
                    return Err(AppError::CapacityExceeded {
                        max_members: group.max_members,
                    });
                }
                Err(err) if err.is_unique_violation() => return Ok(false),
                Err(err) if !retried => {
                    log::warn!(
                        "Adding user {} to group {} failed, retrying: {}",
                        user_id,
                        group.id,
                        err
                    );
                    retried = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn mark_accepted(&self, request_id: Uuid) -> AppResult<JoinRequest> {
        let mut retried = false;
        loop {
            match self
                .store
                .transition_join_request(request_id, JoinRequestStatus::Accepted)
                .await
            {
                Ok(Some(request)) => return Ok(request),
                // Either a previous attempt landed or someone else resolved it
                Ok(None) => {
                    return match self.store.get_join_request(request_id).await? {
                        Some(request) if request.status == JoinRequestStatus::Accepted => {
                            Ok(request)
                        }
                        Some(request) => Err(AppError::InvalidState(format!(
                            "Join request is already {}",
                            request.status
                        ))),
                        None => Err(AppError::NotFound(format!(
                            "Join request {} not found",
                            request_id
                        ))),
                    };
                }
                Err(err) if !retried => {
                    log::warn!(
                        "Marking join request {} accepted failed, retrying: {}",
                        request_id,
                        err
                    );
                    retried = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub async fn remove_member(
        &self,
        group_id: Uuid,
        target_user_id: Uuid,
        actor_id: Uuid,
    ) -> AppResult<()> {
        let group = self.get_group(group_id).await?;
        Self::require_owner(&group, actor_id, "remove members")?;

        if group.is_owner(target_user_id) {
            return Err(AppError::Forbidden(
                "The owner cannot be removed from their group".to_string(),
            ));
        }

        if !self.store.delete_membership(group_id, target_user_id).await? {
            return Err(AppError::NotFound(format!(
                "User {} is not a member of group {}",
                target_user_id, group_id
            )));
        }

        log::info!(
            "Owner {} removed user {} from group {}",
            actor_id,
            target_user_id,
            group_id
        );
        Ok(())
    }

    pub async fn delete_group(&self, group_id: Uuid, actor_id: Uuid) -> AppResult<()> {
        let group = self.get_group(group_id).await?;
        Self::require_owner(&group, actor_id, "delete the group")?;

        if !self.store.delete_group(group_id).await? {
            return Err(AppError::NotFound(format!("Group {} not found", group_id)));
        }

        log::info!("Owner {} deleted group {}", actor_id, group_id);
        Ok(())
    }

    /// Pending requests with requester profiles, oldest first. Owner only.
    pub async fn pending_requests(
        &self,
        group_id: Uuid,
        actor_id: Uuid,
    ) -> AppResult<Vec<JoinRequestView>> {
        let snapshot = self.load_snapshot(group_id).await?;
        Self::require_owner(&snapshot.group, actor_id, "view join requests")?;

        self.request_views(snapshot.pending_requests()).await
    }

    async fn request_views(&self, requests: Vec<JoinRequest>) -> AppResult<Vec<JoinRequestView>> {
        let user_ids: Vec<Uuid> = requests.iter().map(|r| r.user_id).collect();
        let mut profiles = self.profiles.lookup(&user_ids).await?;

        Ok(requests
            .into_iter()
            .map(|request| {
                let requester = profiles
                    .remove(&request.user_id)
                    .unwrap_or_else(|| Profile::unknown(request.user_id));
                JoinRequestView { request, requester }
            })
            .collect())
    }

    /// Dashboard listing, newest group first.
    pub async fn list_groups(
        &self,
        viewer_id: Uuid,
        search: Option<&str>,
    ) -> AppResult<Vec<GroupSummary>> {
        let groups = self.store.list_groups().await?;
        let counts = self.store.membership_counts().await?;
        let memberships = self.store.list_memberships_for_user(viewer_id).await?;
        let requests = self.store.list_join_requests_for_user(viewer_id).await?;

        let groups: Vec<Group> = match search {
            Some(term) => groups.into_iter().filter(|g| g.matches_search(term)).collect(),
            None => groups,
        };

        let owner_ids: Vec<Uuid> = groups.iter().map(|g| g.owner_id).collect();
        let owners = self.profiles.lookup(&owner_ids).await?;

        Ok(groups
            .into_iter()
            .map(|group| {
                let relationship =
                    derive_relationship(&group, &memberships, &requests, viewer_id);
                let member_count = counts.get(&group.id).copied().unwrap_or(0) as i32 + 1;
                let owner_name = owners
                    .get(&group.owner_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| "Unknown".to_string());

                GroupSummary {
                    group,
                    owner_name,
                    member_count,
                    relationship,
                }
            })
            .collect())
    }

    pub async fn group_detail(&self, group_id: Uuid, viewer_id: Uuid) -> AppResult<GroupDetail> {
        let snapshot = self.load_snapshot(group_id).await?;
        let relationship = snapshot.relationship(viewer_id);

        let mut user_ids = vec![snapshot.group.owner_id];
        user_ids.extend(snapshot.memberships.iter().map(|m| m.user_id));
        let profiles = self.profiles.lookup(&user_ids).await?;

        let owner = profile_or_unknown(&profiles, snapshot.group.owner_id);
        let members = snapshot
            .memberships
            .iter()
            .map(|m| profile_or_unknown(&profiles, m.user_id))
            .collect();

        let pending_requests = if relationship == Relationship::Owner {
            self.request_views(snapshot.pending_requests()).await?
        } else {
            Vec::new()
        };

        Ok(GroupDetail {
            member_count: snapshot.member_count(),
            group: snapshot.group,
            owner,
            members,
            relationship,
            pending_requests,
        })
    }
}

fn profile_or_unknown(profiles: &HashMap<Uuid, Profile>, user_id: Uuid) -> Profile {
    profiles
        .get(&user_id)
        .cloned()
        .unwrap_or_else(|| Profile::unknown(user_id))
}
