//! Group chat: member-only history and sending, plus the client-side view
//! that merges history with the live feed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use futures::{StreamExt, stream};
use uuid::Uuid;

use crate::database::{
    DataStore,
    models::{DisplayMessage, Group, MAX_MESSAGE_LENGTH, Message, NewMessage},
};
use crate::error::{AppError, AppResult};
use crate::realtime::{ChangeEvent, ChangeOp, ChangeStream, Relation, Row};

#[derive(Clone)]
pub struct ChatRelay {
    store: Arc<dyn DataStore>,
}

impl ChatRelay {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Only the owner and current members may read or write.
    pub async fn authorize(&self, group_id: Uuid, user_id: Uuid) -> AppResult<Group> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Group {} not found", group_id)))?;

        if group.is_owner(user_id) {
            return Ok(group);
        }

        let is_member = self
            .store
            .list_memberships(group_id)
            .await?
            .iter()
            .any(|m| m.user_id == user_id);

        if is_member {
            Ok(group)
        } else {
            Err(AppError::Unauthorized(
                "Only group members can use the chat".to_string(),
            ))
        }
    }

    /// History snapshot, oldest first with id as tie breaker.
    pub async fn load(&self, group_id: Uuid, viewer_id: Uuid) -> AppResult<Vec<Message>> {
        self.authorize(group_id, viewer_id).await?;

        let mut messages = self.store.list_messages(group_id).await?;
        messages.sort_by_key(Message::sort_key);
        Ok(messages)
    }

    /// Writes the message. The sender's own view picks it up from the live
    /// feed like everyone else's, so nothing is appended locally.
    pub async fn send(&self, group_id: Uuid, sender_id: Uuid, text: &str) -> AppResult<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::BadRequest("Message cannot be empty".to_string()));
        }
        if text.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(AppError::BadRequest(format!(
                "Message must be at most {} characters",
                MAX_MESSAGE_LENGTH
            )));
        }

        self.authorize(group_id, sender_id).await?;

        let message = self
            .store
            .insert_message(NewMessage {
                group_id,
                sender_id,
                text: text.to_string(),
                created_at: Utc::now(),
            })
            .await?;

        log::debug!(
            "User {} sent message {} to group {}",
            sender_id,
            message.id,
            group_id
        );
        Ok(message)
    }

    pub async fn subscribe(&self, relation: Relation, group_id: Uuid) -> AppResult<ChangeStream> {
        Ok(self.store.subscribe(relation, group_id).await?)
    }
}

/// Ordered, de-duplicated message list for one group.
#[derive(Debug, Default, Clone)]
pub struct ChatView {
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
}

impl ChatView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a history snapshot. Returns how many messages were new.
    pub fn merge_snapshot(&mut self, snapshot: Vec<Message>) -> usize {
        let before = self.messages.len();
        for message in snapshot {
            if self.seen.insert(message.id) {
                self.messages.push(message);
            }
        }
        self.messages.sort_by_key(Message::sort_key);
        self.messages.len() - before
    }

    /// Appends a pushed message unless it is already present.
    pub fn on_remote_insert(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        let key = message.sort_key();
        let at = self.messages.partition_point(|m| m.sort_key() <= key);
        self.messages.insert(at, message);
        true
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Marks every message that starts a new calendar day in `tz`.
pub fn day_groups<Tz: TimeZone>(messages: &[Message], tz: &Tz) -> Vec<DisplayMessage> {
    let mut previous_day = None;

    messages
        .iter()
        .map(|message| {
            let day = message.created_at.with_timezone(tz).date_naive();
            let starts_new_day = previous_day != Some(day);
            previous_day = Some(day);

            DisplayMessage {
                message: message.clone(),
                starts_new_day,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Live,
}

/// True when the event ends `viewer_id`'s access to the group's chat.
fn revokes_access(event: &ChangeEvent, viewer_id: Uuid) -> bool {
    match (event.op, &event.row) {
        (ChangeOp::Delete, Row::Group(_)) => true,
        (ChangeOp::Delete, Row::Membership(membership)) => membership.user_id == viewer_id,
        _ => false,
    }
}

struct Feeds {
    viewer_id: Uuid,
    messages: ChangeStream,
    /// Membership and group changes for the same group.
    access: ChangeStream,
}

enum Delivery {
    Access(Option<ChangeEvent>),
    Message(Option<ChangeEvent>),
}

/// A viewer's live chat for one group.
///
/// `open` subscribes before loading history so that nothing committed in
/// between is missed; rows delivered by both are merged by id. The session
/// closes itself when the viewer is removed or the group is deleted.
pub struct ChatSession {
    group_id: Uuid,
    state: SubscriptionState,
    view: ChatView,
    feeds: Option<Feeds>,
}

impl ChatSession {
    pub fn new(group_id: Uuid) -> Self {
        Self {
            group_id,
            state: SubscriptionState::Disconnected,
            view: ChatView::new(),
            feeds: None,
        }
    }

    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn view(&self) -> &ChatView {
        &self.view
    }

    /// Connects and returns the history snapshot.
    pub async fn open(&mut self, relay: &ChatRelay, viewer_id: Uuid) -> AppResult<Vec<Message>> {
        if self.state != SubscriptionState::Disconnected {
            self.close();
        }

        let group_id = self.group_id;
        relay.authorize(group_id, viewer_id).await?;
        self.state = SubscriptionState::Connecting;

        let connected = async {
            let messages = relay.subscribe(Relation::Messages, group_id).await?;
            let memberships = relay.subscribe(Relation::Memberships, group_id).await?;
            let groups = relay.subscribe(Relation::Groups, group_id).await?;
            // Re-checks access after the subscriptions exist
            let history = relay.load(group_id, viewer_id).await?;

            let access: ChangeStream = Box::pin(stream::select(memberships, groups));
            let feeds = Feeds {
                viewer_id,
                messages,
                access,
            };
            Ok::<_, AppError>((feeds, history))
        }
        .await;

        match connected {
            Ok((feeds, history)) => {
                self.view.merge_snapshot(history);
                self.feeds = Some(feeds);
                self.state = SubscriptionState::Live;
                log::debug!("Chat session for group {} is live", group_id);
                Ok(self.view.messages().to_vec())
            }
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    /// Waits for the next message not seen before. `None` once the session is
    /// closed, the feed ends, or the viewer loses access.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            let feeds = self.feeds.as_mut()?;
            let viewer_id = feeds.viewer_id;

            // Access changes already queued win over queued messages
            let delivery = tokio::select! {
                biased;
                event = feeds.access.next() => Delivery::Access(event),
                event = feeds.messages.next() => Delivery::Message(event),
            };

            match delivery {
                Delivery::Access(Some(event)) => {
                    if revokes_access(&event, viewer_id) {
                        log::info!(
                            "Closing chat session of user {} for group {}: access revoked",
                            viewer_id,
                            self.group_id
                        );
                        self.close();
                        return None;
                    }
                }
                Delivery::Message(Some(ChangeEvent {
                    op: ChangeOp::Insert,
                    row: Row::Message(message),
                })) => {
                    if self.view.on_remote_insert(message.clone()) {
                        return Some(message);
                    }
                }
                Delivery::Message(Some(_)) => {}
                Delivery::Access(None) | Delivery::Message(None) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.feeds = None;
        self.state = SubscriptionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::Membership;
    use chrono::{Duration, FixedOffset};
    use pretty_assertions::assert_eq;

    fn message_at(group_id: Uuid, text: &str, created_at: chrono::DateTime<Utc>) -> Message {
        Message {
            id: Uuid::now_v7(),
            group_id,
            sender_id: Uuid::new_v4(),
            text: text.to_string(),
            created_at,
        }
    }

    #[test]
    fn remote_duplicates_are_dropped() {
        let group_id = Uuid::new_v4();
        let message = message_at(group_id, "hi", Utc::now());
        let mut view = ChatView::new();

        assert!(view.on_remote_insert(message.clone()));
        assert!(!view.on_remote_insert(message));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn snapshot_and_feed_overlap_is_merged_once() {
        let group_id = Uuid::new_v4();
        let now = Utc::now();
        let first = message_at(group_id, "first", now - Duration::minutes(2));
        let second = message_at(group_id, "second", now - Duration::minutes(1));
        let mut view = ChatView::new();

        // Live feed delivered `second` before the history arrived
        view.on_remote_insert(second.clone());
        let added = view.merge_snapshot(vec![first.clone(), second.clone()]);

        assert_eq!(added, 1);
        let texts: Vec<&str> = view.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn snapshot_is_ordered_by_time_then_id() {
        let group_id = Uuid::new_v4();
        let at = Utc::now();
        let a = message_at(group_id, "a", at);
        let b = message_at(group_id, "b", at);
        let earlier = message_at(group_id, "earlier", at - Duration::seconds(1));
        let mut view = ChatView::new();

        view.merge_snapshot(vec![b, earlier, a]);

        let texts: Vec<&str> = view.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["earlier", "a", "b"]);
    }

    #[test]
    fn late_remote_insert_lands_in_time_order() {
        let group_id = Uuid::new_v4();
        let now = Utc::now();
        let mut view = ChatView::new();

        view.on_remote_insert(message_at(group_id, "10:05", now));
        view.on_remote_insert(message_at(group_id, "09:59", now - Duration::minutes(6)));

        let texts: Vec<&str> = view.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["09:59", "10:05"]);
    }

    #[test]
    fn day_markers_follow_viewer_timezone() {
        let group_id = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2024, 3, 10, 22, 30, 0).unwrap();
        let messages = vec![
            message_at(group_id, "late", base),
            message_at(group_id, "later", base + Duration::minutes(20)),
            message_at(group_id, "after midnight utc", base + Duration::minutes(95)),
        ];

        let utc_flags: Vec<bool> = day_groups(&messages, &Utc)
            .iter()
            .map(|m| m.starts_new_day)
            .collect();
        assert_eq!(utc_flags, vec![true, false, true]);

        // UTC+2: all three fall on 11 March
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let local_flags: Vec<bool> = day_groups(&messages, &plus_two)
            .iter()
            .map(|m| m.starts_new_day)
            .collect();
        assert_eq!(local_flags, vec![true, false, false]);
    }

    #[test]
    fn day_groups_of_nothing_is_empty() {
        assert!(day_groups(&[], &Utc).is_empty());
    }

    #[test]
    fn only_removals_of_the_viewer_or_the_group_revoke_access() {
        let group_id = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let membership = |user_id| Membership {
            group_id,
            user_id,
            created_at: Utc::now(),
        };

        let own = ChangeEvent::delete(Row::Membership(membership(viewer)));
        let other = ChangeEvent::delete(Row::Membership(membership(Uuid::new_v4())));
        let joined = ChangeEvent::insert(Row::Membership(membership(viewer)));

        assert!(revokes_access(&own, viewer));
        assert!(!revokes_access(&other, viewer));
        assert!(!revokes_access(&joined, viewer));
    }

    #[test]
    fn new_session_is_disconnected() {
        let session = ChatSession::new(Uuid::new_v4());
        assert_eq!(session.state(), SubscriptionState::Disconnected);
        assert!(session.view().is_empty());
    }
}
