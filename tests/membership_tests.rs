use futures::StreamExt;
use groupwork::AppError;
use groupwork::database::models::{JoinRequestStatus, Relationship, ResolveAction};
use groupwork::database::{DataStore, StoreOp};
use groupwork::realtime::{ChangeOp, Relation, Row};
use pretty_assertions::assert_eq;

mod common;

use common::TestContext;

#[tokio::test]
async fn capacity_counts_the_owner() {
    common::setup_test_env();
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 2).await;
    let first = ctx.create_user().await;
    let second = ctx.create_user().await;

    let first_request = ctx.request(&group, first).await;
    // Requests may queue while the group is full
    let second_request = ctx.request(&group, second).await;

    ctx.state
        .membership
        .resolve_request(group.id, first_request.id, ResolveAction::Accept, owner)
        .await
        .unwrap();

    let result = ctx
        .state
        .membership
        .resolve_request(group.id, second_request.id, ResolveAction::Accept, owner)
        .await;
    assert!(matches!(
        result,
        Err(AppError::CapacityExceeded { max_members: 2 })
    ));

    let snapshot = ctx.state.membership.load_snapshot(group.id).await.unwrap();
    assert_eq!(snapshot.member_count(), 2);
    assert_eq!(snapshot.relationship(second), Relationship::PendingRequester);

    // Freeing a seat lets the same request through
    ctx.state
        .membership
        .remove_member(group.id, first, owner)
        .await
        .unwrap();
    let accepted = ctx
        .state
        .membership
        .resolve_request(group.id, second_request.id, ResolveAction::Accept, owner)
        .await
        .unwrap();
    assert_eq!(accepted.status, JoinRequestStatus::Accepted);

    let snapshot = ctx.state.membership.load_snapshot(group.id).await.unwrap();
    assert_eq!(snapshot.member_count(), 2);
    assert_eq!(snapshot.relationship(first), Relationship::Stranger);
    assert_eq!(snapshot.relationship(second), Relationship::Member);
}

#[tokio::test]
async fn concurrent_accepts_never_overfill_a_group() {
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 3).await;

    let mut requests = Vec::new();
    for _ in 0..6 {
        let user = ctx.create_user().await;
        requests.push(ctx.request(&group, user).await);
    }

    let accepts = requests.iter().map(|request| {
        ctx.state
            .membership
            .resolve_request(group.id, request.id, ResolveAction::Accept, owner)
    });
    let results = futures::future::join_all(accepts).await;

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let full = results
        .iter()
        .filter(|r| matches!(r, Err(AppError::CapacityExceeded { .. })))
        .count();
    assert_eq!(accepted, 2);
    assert_eq!(full, 4);

    let snapshot = ctx.state.membership.load_snapshot(group.id).await.unwrap();
    assert_eq!(snapshot.member_count(), 3);
}

#[tokio::test]
async fn duplicate_request_is_a_conflict() {
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 5).await;
    let user = ctx.create_user().await;

    ctx.request(&group, user).await;
    let again = ctx.state.membership.request_to_join(group.id, user).await;

    assert!(matches!(again, Err(AppError::Conflict(_))));
    let pending = ctx
        .state
        .membership
        .pending_requests(group.id, owner)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn owner_and_members_cannot_request() {
    let ctx = TestContext::new();
    let (group, members) = ctx.group_with_members(4, 1).await;

    let by_owner = ctx
        .state
        .membership
        .request_to_join(group.id, group.owner_id)
        .await;
    let by_member = ctx.state.membership.request_to_join(group.id, members[0]).await;

    assert!(matches!(by_owner, Err(AppError::InvalidState(_))));
    assert!(matches!(by_member, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn resolved_requests_cannot_be_resolved_again() {
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 5).await;
    let user = ctx.create_user().await;
    let request = ctx.request(&group, user).await;

    let rejected = ctx
        .state
        .membership
        .resolve_request(group.id, request.id, ResolveAction::Reject, owner)
        .await
        .unwrap();
    assert_eq!(rejected.status, JoinRequestStatus::Rejected);

    for action in [ResolveAction::Reject, ResolveAction::Accept] {
        let result = ctx
            .state
            .membership
            .resolve_request(group.id, request.id, action, owner)
            .await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
    }

    let members = ctx.store.list_memberships(group.id).await.unwrap();
    assert!(members.is_empty());
}

#[tokio::test]
async fn rejected_user_may_request_again() {
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 5).await;
    let user = ctx.create_user().await;
    let request = ctx.request(&group, user).await;

    ctx.state
        .membership
        .resolve_request(group.id, request.id, ResolveAction::Reject, owner)
        .await
        .unwrap();
    assert_eq!(
        ctx.state.membership.relationship(group.id, user).await.unwrap(),
        Relationship::RejectedRequester
    );

    let second = ctx.request(&group, user).await;
    assert_ne!(second.id, request.id);
    assert_eq!(
        ctx.state.membership.relationship(group.id, user).await.unwrap(),
        Relationship::PendingRequester
    );
}

#[tokio::test]
async fn only_the_owner_resolves_requests() {
    let ctx = TestContext::new();
    let (group, members) = ctx.group_with_members(5, 1).await;
    let user = ctx.create_user().await;
    let request = ctx.request(&group, user).await;

    for actor in [members[0], user] {
        let result = ctx
            .state
            .membership
            .resolve_request(group.id, request.id, ResolveAction::Accept, actor)
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    let pending = ctx.store.get_join_request(request.id).await.unwrap().unwrap();
    assert!(pending.is_pending());
}

#[tokio::test]
async fn request_from_another_group_is_not_found() {
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 5).await;
    let other_group = ctx.create_group(owner, 5).await;
    let user = ctx.create_user().await;
    let request = ctx.request(&other_group, user).await;

    let result = ctx
        .state
        .membership
        .resolve_request(group.id, request.id, ResolveAction::Accept, owner)
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn accept_completes_after_one_transient_status_failure() {
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 5).await;
    let user = ctx.create_user().await;
    let request = ctx.request(&group, user).await;

    ctx.store.fail_next(StoreOp::TransitionJoinRequest, 1);
    let accepted = ctx
        .state
        .membership
        .resolve_request(group.id, request.id, ResolveAction::Accept, owner)
        .await
        .unwrap();

    assert_eq!(accepted.status, JoinRequestStatus::Accepted);
    let members = ctx.store.list_memberships(group.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, user);
}

#[tokio::test]
async fn accept_retries_a_transient_membership_failure() {
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 5).await;
    let user = ctx.create_user().await;
    let request = ctx.request(&group, user).await;

    ctx.store.fail_next(StoreOp::InsertMembership, 1);
    ctx.state
        .membership
        .resolve_request(group.id, request.id, ResolveAction::Accept, owner)
        .await
        .unwrap();

    assert_eq!(
        ctx.state.membership.relationship(group.id, user).await.unwrap(),
        Relationship::Member
    );
}

#[tokio::test]
async fn failed_accept_rolls_back_the_membership() {
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 5).await;
    let user = ctx.create_user().await;
    let request = ctx.request(&group, user).await;

    ctx.store.fail_next(StoreOp::TransitionJoinRequest, 2);
    let result = ctx
        .state
        .membership
        .resolve_request(group.id, request.id, ResolveAction::Accept, owner)
        .await;

    assert!(matches!(result, Err(AppError::Store(_))));
    assert!(ctx.store.list_memberships(group.id).await.unwrap().is_empty());
    assert_eq!(
        ctx.state.membership.relationship(group.id, user).await.unwrap(),
        Relationship::PendingRequester
    );

    // The owner can simply try again
    ctx.state
        .membership
        .resolve_request(group.id, request.id, ResolveAction::Accept, owner)
        .await
        .unwrap();
    assert_eq!(ctx.store.list_memberships(group.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn removed_member_becomes_a_stranger() {
    let ctx = TestContext::new();
    let (group, members) = ctx.group_with_members(5, 2).await;
    let removed = members[0];

    ctx.state
        .membership
        .remove_member(group.id, removed, group.owner_id)
        .await
        .unwrap();

    let snapshot = ctx.state.membership.load_snapshot(group.id).await.unwrap();
    assert_eq!(snapshot.relationship(removed), Relationship::Stranger);
    assert_eq!(snapshot.relationship(members[1]), Relationship::Member);
    assert_eq!(snapshot.member_count(), 2);

    let again = ctx
        .state
        .membership
        .remove_member(group.id, removed, group.owner_id)
        .await;
    assert!(matches!(again, Err(AppError::NotFound(_))));

    // A removed member can ask to come back
    ctx.request(&group, removed).await;
}

#[tokio::test]
async fn members_cannot_remove_each_other_or_the_owner() {
    let ctx = TestContext::new();
    let (group, members) = ctx.group_with_members(5, 2).await;

    let by_member = ctx
        .state
        .membership
        .remove_member(group.id, members[1], members[0])
        .await;
    assert!(matches!(by_member, Err(AppError::Forbidden(_))));

    let owner_self = ctx
        .state
        .membership
        .remove_member(group.id, group.owner_id, group.owner_id)
        .await;
    assert!(matches!(owner_self, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn deleting_a_group_removes_everything_attached() {
    let ctx = TestContext::new();
    let (group, members) = ctx.group_with_members(5, 1).await;
    let requester = ctx.create_user().await;
    ctx.request(&group, requester).await;
    ctx.state
        .chat
        .send(group.id, members[0], "bye")
        .await
        .unwrap();

    let by_member = ctx.state.membership.delete_group(group.id, members[0]).await;
    assert!(matches!(by_member, Err(AppError::Forbidden(_))));

    ctx.state
        .membership
        .delete_group(group.id, group.owner_id)
        .await
        .unwrap();

    assert!(ctx.store.get_group(group.id).await.unwrap().is_none());
    assert!(ctx.store.list_memberships(group.id).await.unwrap().is_empty());
    assert!(ctx.store.list_join_requests(group.id).await.unwrap().is_empty());
    assert!(ctx.store.list_messages(group.id).await.unwrap().is_empty());

    let missing = ctx.state.membership.group_detail(group.id, group.owner_id).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn detail_shows_requests_to_the_owner_only() {
    let ctx = TestContext::new();
    let owner = ctx.create_named_user("Ada Owner").await;
    let group = ctx.create_group(owner, 5).await;
    let member = ctx.create_named_user("Ben Member").await;
    let requester = ctx.create_named_user("Cleo Requester").await;
    let request = ctx.request(&group, member).await;
    ctx.state
        .membership
        .resolve_request(group.id, request.id, ResolveAction::Accept, owner)
        .await
        .unwrap();
    ctx.request(&group, requester).await;

    let as_owner = ctx.state.membership.group_detail(group.id, owner).await.unwrap();
    assert_eq!(as_owner.relationship, Relationship::Owner);
    assert_eq!(as_owner.owner.name, "Ada Owner");
    assert_eq!(as_owner.member_count, 2);
    assert_eq!(as_owner.members.len(), 1);
    assert_eq!(as_owner.members[0].name, "Ben Member");
    assert_eq!(as_owner.pending_requests.len(), 1);
    assert_eq!(as_owner.pending_requests[0].requester.name, "Cleo Requester");

    let as_member = ctx.state.membership.group_detail(group.id, member).await.unwrap();
    assert_eq!(as_member.relationship, Relationship::Member);
    assert!(as_member.pending_requests.is_empty());

    let as_requester = ctx
        .state
        .membership
        .group_detail(group.id, requester)
        .await
        .unwrap();
    assert_eq!(as_requester.relationship, Relationship::PendingRequester);
}

#[tokio::test]
async fn non_owner_cannot_list_pending_requests() {
    let ctx = TestContext::new();
    let (group, members) = ctx.group_with_members(5, 1).await;

    let result = ctx.state.membership.pending_requests(group.id, members[0]).await;

    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn listing_reports_relationship_and_count_per_group() {
    let ctx = TestContext::new();
    let viewer = ctx.create_user().await;
    let own = ctx.create_group(viewer, 3).await;
    let (joined, _) = ctx.group_with_members(4, 2).await;
    let (requested, _) = ctx.group_with_members(4, 0).await;
    ctx.request(&requested, viewer).await;
    let request = ctx.request(&joined, viewer).await;
    ctx.state
        .membership
        .resolve_request(joined.id, request.id, ResolveAction::Accept, joined.owner_id)
        .await
        .unwrap();

    let listing = ctx.state.membership.list_groups(viewer, None).await.unwrap();
    assert_eq!(listing.len(), 3);

    let find = |id| listing.iter().find(|s| s.group.id == id).unwrap();
    assert_eq!(find(own.id).relationship, Relationship::Owner);
    assert_eq!(find(own.id).member_count, 1);
    assert_eq!(find(joined.id).relationship, Relationship::Member);
    assert_eq!(find(joined.id).member_count, 4);
    assert_eq!(find(requested.id).relationship, Relationship::PendingRequester);

    // Newest first
    assert_eq!(listing[0].group.id, requested.id);
}

#[tokio::test]
async fn listing_filters_by_search_term() {
    let ctx = TestContext::new();
    let viewer = ctx.create_user().await;
    let owner = ctx.create_user().await;
    let mut input = common::group_input(4);
    input.project_name = "Autonomous Drone".to_string();
    let drone = ctx
        .state
        .membership
        .create_group(owner, input)
        .await
        .unwrap();
    let mut input = common::group_input(4);
    input.project_name = "Protein Folding".to_string();
    input.skills_required = vec!["Biology".to_string()];
    ctx.state
        .membership
        .create_group(owner, input)
        .await
        .unwrap();

    let listing = ctx
        .state
        .membership
        .list_groups(viewer, Some("drone"))
        .await
        .unwrap();

    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].group.id, drone.id);
}

#[tokio::test]
async fn accepted_membership_is_pushed_to_subscribers() {
    let ctx = TestContext::new();
    let owner = ctx.create_user().await;
    let group = ctx.create_group(owner, 5).await;
    let user = ctx.create_user().await;
    let request = ctx.request(&group, user).await;

    let mut memberships = ctx
        .store
        .subscribe(Relation::Memberships, group.id)
        .await
        .unwrap();
    let mut requests = ctx
        .store
        .subscribe(Relation::JoinRequests, group.id)
        .await
        .unwrap();

    ctx.state
        .membership
        .resolve_request(group.id, request.id, ResolveAction::Accept, owner)
        .await
        .unwrap();

    let event = memberships.next().await.unwrap();
    assert_eq!(event.op, ChangeOp::Insert);
    assert!(matches!(event.row, Row::Membership(ref m) if m.user_id == user));

    let event = requests.next().await.unwrap();
    assert_eq!(event.op, ChangeOp::Update);
    assert!(matches!(
        event.row,
        Row::JoinRequest(ref r) if r.status == JoinRequestStatus::Accepted
    ));
}
