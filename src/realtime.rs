//! In-process change notification.
//!
//! Store adapters publish a [`ChangeEvent`] after every committed mutation and
//! any number of subscribers receive it on a per-group channel. Events are only
//! delivered to subscribers that were listening when the event was published.

use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::database::models::{Group, JoinRequest, Membership, Message};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Groups,
    Memberships,
    JoinRequests,
    Messages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "relation", content = "row", rename_all = "snake_case")]
pub enum Row {
    Group(Group),
    Membership(Membership),
    JoinRequest(JoinRequest),
    Message(Message),
}

impl Row {
    pub fn relation(&self) -> Relation {
        match self {
            Row::Group(_) => Relation::Groups,
            Row::Membership(_) => Relation::Memberships,
            Row::JoinRequest(_) => Relation::JoinRequests,
            Row::Message(_) => Relation::Messages,
        }
    }

    pub fn group_id(&self) -> Uuid {
        match self {
            Row::Group(group) => group.id,
            Row::Membership(membership) => membership.group_id,
            Row::JoinRequest(request) => request.group_id,
            Row::Message(message) => message.group_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    #[serde(flatten)]
    pub row: Row,
}

impl ChangeEvent {
    pub fn insert(row: Row) -> Self {
        Self {
            op: ChangeOp::Insert,
            row,
        }
    }

    pub fn update(row: Row) -> Self {
        Self {
            op: ChangeOp::Update,
            row,
        }
    }

    pub fn delete(row: Row) -> Self {
        Self {
            op: ChangeOp::Delete,
            row,
        }
    }
}

/// Live feed of change events. Dropping it tears the subscription down.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

type ChannelKey = (Relation, Uuid);

#[derive(Clone)]
pub struct Notifier {
    channels: Arc<DashMap<ChannelKey, broadcast::Sender<ChangeEvent>>>,
    capacity: usize,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channel(&self, key: ChannelKey) -> broadcast::Sender<ChangeEvent> {
        self.channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn publish(&self, event: ChangeEvent) {
        let key = (event.row.relation(), event.row.group_id());
        let op = event.op;

        // Nobody listening is fine
        if let Some(tx) = self.channels.get(&key) {
            let delivered = tx.send(event).unwrap_or(0);
            log::debug!(
                "Published {:?} on {:?} for group {} to {} subscriber(s)",
                op,
                key.0,
                key.1,
                delivered
            );
        }
    }

    pub fn subscribe(&self, relation: Relation, group_id: Uuid) -> ChangeStream {
        let rx = self.channel((relation, group_id)).subscribe();

        // A lagged receiver skips what it missed; clients reload to resync
        let stream = BroadcastStream::new(rx).filter_map(|result| result.ok());

        Box::pin(stream)
    }

    /// Drop channels nobody listens to anymore, e.g. after a group is deleted.
    pub fn prune(&self) {
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
