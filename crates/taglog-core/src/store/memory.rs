//! In-memory backing store.
//!
//! A concurrent, in-process implementation of [`KvStore`], suitable for
//! tests, simulation, and embedded single-process use. String values and
//! sorted sets live in `DashMap`s; each channel subscriber gets its own
//! unbounded delivery queue, so publishing never blocks on a slow reader.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;

use super::{ChannelMessage, KvStore, StoreError, Subscription};

struct SubscriberSlot {
    id: u64,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

/// In-memory implementation of [`KvStore`].
#[derive(Default)]
pub struct MemoryStore {
    strings: DashMap<String, Bytes>,
    zsets: DashMap<String, HashMap<String, f64>>,
    subscribers: DashMap<String, Vec<SubscriberSlot>>,
    next_sub_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .get(channel)
            .map(|slots| slots.len())
            .unwrap_or(0)
    }
}

/// Match a key against a glob pattern; only `*` is special.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    if !rest.starts_with(parts[0]) {
        return false;
    }
    rest = &rest[parts[0].len()..];

    let last = parts[parts.len() - 1];
    if !rest.ends_with(last) {
        return false;
    }
    rest = &rest[..rest.len() - last.len()];

    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    true
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        // The entry guard serializes concurrent increments on the same key.
        let mut entry = self
            .strings
            .entry(key.to_string())
            .or_insert_with(|| Bytes::from_static(b"0"));
        let current = std::str::from_utf8(entry.value())
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| StoreError::wrong_type(key))?;
        let next = current + 1;
        *entry.value_mut() = Bytes::from(next.to_string());
        Ok(next)
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        trace!(key, len = value.len(), "set");
        self.strings.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.strings.get(key).map(|v| v.clone()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>, StoreError> {
        Ok(keys
            .iter()
            .map(|key| self.strings.get(key).map(|v| v.clone()))
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            self.strings.remove(key);
            self.zsets.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut matches: BTreeSet<String> = BTreeSet::new();
        for entry in self.strings.iter() {
            if glob_match(pattern, entry.key()) {
                matches.insert(entry.key().clone());
            }
        }
        for entry in self.zsets.iter() {
            if glob_match(pattern, entry.key()) {
                matches.insert(entry.key().clone());
            }
        }
        Ok(matches.into_iter().collect())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        trace!(key, member, score, "zadd");
        self.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrevrangebyscore(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: Option<usize>,
        count: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let mut scored: Vec<(String, f64)> = match self.zsets.get(key) {
            Some(set) => set
                .iter()
                .filter(|(_, score)| **score >= min && **score <= max)
                .map(|(member, score)| (member.clone(), *score))
                .collect(),
            None => return Ok(Vec::new()),
        };
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

        let skipped = scored.into_iter().skip(offset.unwrap_or(0));
        let members = match count {
            Some(n) => skipped.take(n).map(|(member, _)| member).collect(),
            None => skipped.map(|(member, _)| member).collect(),
        };
        Ok(members)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<(), StoreError> {
        if let Some(mut set) = self.zsets.get_mut(key) {
            for member in members {
                set.remove(member);
            }
        }
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<(), StoreError> {
        if let Some(mut set) = self.zsets.get_mut(key) {
            set.retain(|_, score| *score < min || *score > max);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), StoreError> {
        if let Some(mut slots) = self.subscribers.get_mut(channel) {
            // Drop subscribers whose receiving half is gone.
            slots.retain(|slot| slot.tx.send(ChannelMessage::Data(payload.clone())).is_ok());
            trace!(channel, subscribers = slots.len(), "published");
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // The ack sits first in the queue, ahead of any data.
        let _ = tx.send(ChannelMessage::Subscribed);
        self.subscribers
            .entry(channel.to_string())
            .or_default()
            .push(SubscriberSlot { id, tx });
        trace!(channel, id, "subscribed");
        Ok(Subscription::new(id, channel.to_string(), rx))
    }

    async fn unsubscribe(&self, sub: &Subscription) -> Result<(), StoreError> {
        if let Some(mut slots) = self.subscribers.get_mut(sub.channel()) {
            if let Some(at) = slots.iter().position(|slot| slot.id == sub.id()) {
                let slot = slots.remove(at);
                let _ = slot.tx.send(ChannelMessage::Unsubscribed);
                trace!(channel = sub.channel(), id = sub.id(), "unsubscribed");
            }
        }
        Ok(())
    }
}
