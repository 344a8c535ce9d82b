//! The backing key/value store boundary.
//!
//! The engine talks to its store only through the [`KvStore`] trait: atomic
//! counters, plain string values, sorted sets for the time-ordered tag
//! indices, and publish/subscribe channels for the live tail. Anything that
//! provides these primitives can back a logger; [`MemoryStore`] is the
//! in-process implementation shipped for tests and embedded use.
//!
//! Subscription receive distinguishes data messages from protocol control
//! acknowledgements, mirroring how real pub/sub protocols interleave both
//! on one connection.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;

pub use memory::MemoryStore;

/// Errors reported by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable or the connection failed mid-command
    #[error("connection error: {0}")]
    Connection(String),

    /// A command hit a key holding the wrong kind of value
    #[error("wrong value type at key: {0}")]
    WrongType(String),

    /// A command the store does not support
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl StoreError {
    /// Create a new Connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a new WrongType error.
    pub fn wrong_type(key: impl Into<String>) -> Self {
        Self::WrongType(key.into())
    }
}

/// One message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// Control acknowledgement of a subscribe
    Subscribed,
    /// A published payload
    Data(Bytes),
    /// Control acknowledgement of an unsubscribe; no further data follows
    Unsubscribed,
}

/// Receiving half of one channel subscription.
///
/// Created by [`KvStore::subscribe`]; each subscriber owns an independent
/// delivery queue (broadcast, not competing consumers). `recv` takes `&self`
/// so an [`KvStore::unsubscribe`] issued elsewhere can interrupt a blocked
/// receiver by enqueueing the final control message.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    channel: String,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelMessage>>,
}

impl Subscription {
    /// Assemble a subscription from its delivery queue. Store
    /// implementations keep the sending half.
    pub fn new(id: u64, channel: String, rx: mpsc::UnboundedReceiver<ChannelMessage>) -> Self {
        Self {
            id,
            channel,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Store-assigned subscriber id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The channel this subscription is bound to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receive the next message; `None` once the sending side is gone.
    pub async fn recv(&self) -> Option<ChannelMessage> {
        self.rx.lock().await.recv().await
    }
}

/// Backing store contract for the logger engine.
///
/// Implementations must be safe to share across execution units; every
/// command is independently atomic (multi-step engine operations are not,
/// by design).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increment a counter key, returning the new value.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Set a string value.
    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Get many string values; absent keys yield `None` in place.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, StoreError>;

    /// Delete keys by exact name. Missing keys are ignored.
    async fn del(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Enumerate keys matching a glob pattern (`*` wildcard).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Insert or update a member with a score in a sorted set.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Members with `min <= score <= max`, highest score first, optionally
    /// skipping `offset` and returning at most `count`.
    async fn zrevrangebyscore(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: Option<usize>,
        count: Option<usize>,
    ) -> Result<Vec<String>, StoreError>;

    /// Remove members from a sorted set.
    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), StoreError>;

    /// Remove all members with `min <= score <= max`.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<(), StoreError>;

    /// Publish a payload to every current subscriber of a channel.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), StoreError>;

    /// Open an independent subscription to a channel.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError>;

    /// Detach a subscription; a blocked [`Subscription::recv`] observes
    /// [`ChannelMessage::Unsubscribed`] and terminates.
    async fn unsubscribe(&self, sub: &Subscription) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The trait must stay object-safe: the engine holds `Arc<dyn KvStore>`.
    fn _assert_object_safe(_: &dyn KvStore) {}

    #[test]
    fn test_error_helpers() {
        assert!(matches!(
            StoreError::connection("refused"),
            StoreError::Connection(_)
        ));
        let err = StoreError::wrong_type("counter");
        assert!(err.to_string().contains("counter"));
    }
}
