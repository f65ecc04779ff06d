//! Session-keyed publish/subscribe for cursor and queue changes.
//!
//! Delivery is best effort: nothing is persisted, a subscriber that falls
//! behind skips to the newest frames, and anyone who missed frames must
//! re-read the store.

use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, PoisonError},
};

use shared::{domain::SessionId, protocol::ServerEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Cursor(SessionId),
    Queue(SessionId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Cursor(session_id) => write!(f, "session:{}:cursor", session_id.0),
            Topic::Queue(session_id) => write!(f, "session:{}:queue", session_id.0),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Delivery {
    Event(ServerEvent),
    /// Frames were dropped; the consumer must reload from the store.
    Lagged(u64),
}

#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<ServerEvent>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next frame, or `None` once the topic has been torn down.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.receiver.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(RecvError::Lagged(skipped)) => Some(Delivery::Lagged(skipped)),
            Err(RecvError::Closed) => None,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Delivery> {
        BroadcastStream::new(self.receiver).map(|frame| match frame {
            Ok(event) => Delivery::Event(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Delivery::Lagged(skipped),
        })
    }
}

pub trait Broadcaster: Send + Sync {
    /// Fire-and-forget. Returns how many subscribers the frame reached.
    fn publish(&self, topic: Topic, event: ServerEvent) -> usize;
    fn subscribe(&self, topic: Topic) -> Subscription;
    /// Releases the topic once no live subscription remains. Call after the
    /// subscription (or its stream) has been dropped.
    fn unsubscribe(&self, topic: Topic);
}

/// In-process transport: one tokio broadcast channel per topic, created on
/// first subscription and dropped when its last subscriber leaves.
pub struct LocalBroadcaster {
    capacity: usize,
    channels: Mutex<HashMap<Topic, broadcast::Sender<ServerEvent>>>,
}

impl LocalBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(&topic)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster for LocalBroadcaster {
    fn publish(&self, topic: Topic, event: ServerEvent) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = channels.get(&topic) else {
            debug!(%topic, "no subscribers; dropping frame");
            return 0;
        };
        match sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => 0,
        }
    }

    fn subscribe(&self, topic: Topic) -> Subscription {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let receiver = channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(%topic, "subscriber attached");
        Subscription { topic, receiver }
    }

    fn unsubscribe(&self, topic: Topic) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(&topic)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&topic);
            debug!(%topic, "last subscriber left; topic released");
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
