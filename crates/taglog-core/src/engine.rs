//! The logger engine: write, query, live tail, expiration, cleanup.
//!
//! [`TagLogger`] is the engine handle. It is built once over a backing
//! store and is cheap to clone; clones share the store connection and the
//! configuration (key prefix, default archive callback) and nothing else.
//! Per-execution-unit state (ambient context and the live-tail
//! subscription) lives in a [`LoggerHandle`] obtained from
//! [`TagLogger::handle`]; each unit owns its own.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use taglog_core::{MemoryStore, Query, TagLogger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let logger = TagLogger::builder()
//!         .prefix("app")
//!         .build(Arc::new(MemoryStore::new()));
//!
//!     logger.log("service started").await?;
//!
//!     let handle = logger.handle();
//!     handle.add_tags(["worker"]);
//!     handle.log("picked up a job").await?;
//!
//!     for record in logger.query(Query::new().tag("worker")).await? {
//!         println!("{record}");
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::context::{ContextScope, ContextState, ContextStore};
use crate::error::{LogError, LogResult};
use crate::keys::{KeySpace, ALL_TAG};
use crate::record::{LogRecord, Message};
use crate::store::{ChannelMessage, KvStore, Subscription};
use crate::tagging::Annotation;
use crate::time::to_epoch_secs;

/// Archival callback invoked for each record removed by a sweep.
///
/// A failure aborts the sweep before any removal executes, leaving every
/// unprocessed record indexed for the next attempt.
pub type ArchiveFn =
    Arc<dyn Fn(&LogRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// When a record should expire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
    /// At an absolute deadline
    At(DateTime<Utc>),
    /// This long after the record's effective timestamp
    After(Duration),
}

impl Expiry {
    fn resolve(&self, ts: DateTime<Utc>) -> f64 {
        match self {
            Expiry::At(deadline) => to_epoch_secs(*deadline),
            Expiry::After(delta) => to_epoch_secs(ts + *delta),
        }
    }
}

impl From<DateTime<Utc>> for Expiry {
    fn from(deadline: DateTime<Utc>) -> Self {
        Expiry::At(deadline)
    }
}

impl From<Duration> for Expiry {
    fn from(delta: Duration) -> Self {
        Expiry::After(delta)
    }
}

impl From<u64> for Expiry {
    fn from(seconds: u64) -> Self {
        Expiry::After(Duration::seconds(seconds as i64))
    }
}

/// Everything one `log` call carries besides the ambient context.
#[derive(Debug, Clone)]
pub struct LogEntry {
    message: Message,
    annotations: Vec<Annotation>,
    ts: Option<DateTime<Utc>>,
    expire: Option<Expiry>,
}

impl LogEntry {
    pub fn new(message: impl Into<Message>) -> Self {
        Self {
            message: message.into(),
            annotations: Vec::new(),
            ts: None,
            expire: None,
        }
    }

    /// Attach a plain tag.
    pub fn tag(mut self, name: impl Into<String>) -> Self {
        self.annotations.push(Annotation::Tag(name.into()));
        self
    }

    /// Attach a plain attribute.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.annotations.push(Annotation::Attr(key.into(), value.into()));
        self
    }

    /// Attach a tagging attribute (attribute plus derived `"key:value"` tag).
    pub fn tagging(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.annotations
            .push(Annotation::Tagging(key.into(), value.into()));
        self
    }

    /// Attach an already-built annotation.
    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Use an explicit timestamp instead of the write-time wall clock.
    pub fn ts(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = Some(ts);
        self
    }

    /// Expire the record, absolutely or relative to its timestamp.
    pub fn expire(mut self, expiry: impl Into<Expiry>) -> Self {
        self.expire = Some(expiry.into());
        self
    }
}

impl From<&str> for LogEntry {
    fn from(message: &str) -> Self {
        LogEntry::new(message)
    }
}

impl From<String> for LogEntry {
    fn from(message: String) -> Self {
        LogEntry::new(message)
    }
}

impl From<Value> for LogEntry {
    fn from(message: Value) -> Self {
        LogEntry::new(message)
    }
}

impl From<Message> for LogEntry {
    fn from(message: Message) -> Self {
        Self {
            message,
            annotations: Vec::new(),
            ts: None,
            expire: None,
        }
    }
}

/// Parameters of one read. Defaults to the universal tag, no bounds.
#[derive(Debug, Clone, Default)]
pub struct Query {
    tag: Option<String>,
    limit: Option<usize>,
    min_ts: Option<DateTime<Utc>>,
    max_ts: Option<DateTime<Utc>>,
    attr_filter: BTreeMap<String, Value>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to records carrying this tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Return at most this many records, starting from the most recent.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Lower timestamp bound (inclusive).
    pub fn min_ts(mut self, min_ts: DateTime<Utc>) -> Self {
        self.min_ts = Some(min_ts);
        self
    }

    /// Upper timestamp bound (inclusive).
    pub fn max_ts(mut self, max_ts: DateTime<Utc>) -> Self {
        self.max_ts = Some(max_ts);
        self
    }

    /// Filter by one tagging-attribute pair (translated to its derived
    /// tag). Supplying more than one pair, or combining a pair with an
    /// explicit tag, is an [`LogError::InvalidFilter`] usage error.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attr_filter.insert(key.into(), value.into());
        self
    }

    fn resolve_tag(&self) -> LogResult<String> {
        if self.attr_filter.is_empty() {
            return Ok(self.tag.clone().unwrap_or_else(|| ALL_TAG.to_string()));
        }
        if self.tag.is_some() {
            return Err(LogError::InvalidFilter(
                "attribute filter cannot be combined with an explicit tag".to_string(),
            ));
        }
        let mut pairs = self.attr_filter.iter();
        match (pairs.next(), pairs.next()) {
            (Some((key, value)), None) => Ok(Annotation::derived_tag(key, value)),
            _ => Err(LogError::InvalidFilter(format!(
                "attribute filter must be exactly one key/value pair, got {}",
                self.attr_filter.len()
            ))),
        }
    }
}

struct EngineShared {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    archive: Option<ArchiveFn>,
}

/// Builder for [`TagLogger`]. The only way to obtain an engine, so an
/// unconfigured logger cannot exist.
#[derive(Default)]
pub struct TagLoggerBuilder {
    prefix: Option<String>,
    archive: Option<ArchiveFn>,
}

impl TagLoggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace prefix for every key the engine touches.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Default archival callback for expiration sweeps. A callback passed
    /// to [`TagLogger::expire`] directly takes precedence.
    pub fn archive<F>(mut self, archive: F) -> Self
    where
        F: Fn(&LogRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.archive = Some(Arc::new(archive));
        self
    }

    /// Bind the engine to its backing store.
    pub fn build(self, store: Arc<dyn KvStore>) -> TagLogger {
        TagLogger {
            shared: Arc::new(EngineShared {
                store,
                keys: KeySpace::new(self.prefix),
                archive: self.archive,
            }),
        }
    }
}

/// The logger engine handle. Cloning shares the store connection and
/// configuration; see the module docs for the per-unit [`LoggerHandle`].
#[derive(Clone)]
pub struct TagLogger {
    shared: Arc<EngineShared>,
}

impl TagLogger {
    pub fn builder() -> TagLoggerBuilder {
        TagLoggerBuilder::new()
    }

    /// A fresh per-execution-unit handle with empty ambient context.
    pub fn handle(&self) -> LoggerHandle {
        LoggerHandle {
            engine: self.clone(),
            context: ContextStore::new(),
            tail: Mutex::new(None),
        }
    }

    /// Write one record with no ambient context. See [`LoggerHandle::log`]
    /// for the context-merging variant.
    ///
    /// The write fans out as separate store calls (counter, record,
    /// indices, publish) with no transaction around them; a failure
    /// mid-sequence surfaces to the caller and can leave a record without
    /// full index coverage. Reads tolerate that gap.
    pub async fn log(&self, entry: impl Into<LogEntry>) -> LogResult<()> {
        self.log_in_context(entry.into(), &ContextState::default())
            .await
    }

    pub(crate) async fn log_in_context(
        &self,
        entry: LogEntry,
        ambient: &ContextState,
    ) -> LogResult<()> {
        let shared = &self.shared;
        let ts = entry.ts.unwrap_or_else(Utc::now);
        let ts_secs = to_epoch_secs(ts);
        let expire = entry.expire.map(|e| e.resolve(ts));

        // Ambient state first, call-site annotations on top: attribute
        // collisions resolve by specificity, tags dedup in first-seen order.
        let mut tags = ambient.tags.clone();
        let mut attrs = ambient.attrs.clone();
        for annotation in &entry.annotations {
            annotation.expand(&mut tags, &mut attrs);
        }

        let id = shared.store.incr(&shared.keys.counter()).await?;
        let record = LogRecord {
            id,
            ts: ts_secs,
            message: entry.message,
            attrs,
            tags,
            expire,
        };
        let payload = record.encode()?;

        shared
            .store
            .set(&shared.keys.record(id), payload.clone())
            .await?;

        let member = id.to_string();
        shared
            .store
            .zadd(&shared.keys.all_flow(), &member, ts_secs)
            .await?;
        for tag in &record.tags {
            shared
                .store
                .zadd(&shared.keys.flow(tag), &member, ts_secs)
                .await?;
        }
        if let Some(deadline) = expire {
            shared
                .store
                .zadd(&shared.keys.expire_flow(), &member, deadline)
                .await?;
        }

        shared
            .store
            .publish(&shared.keys.channel(), payload)
            .await?;

        debug!(id, ts = ts_secs, tags = ?record.tags, "log record stored");
        Ok(())
    }

    /// Records matching a query, most recent first. Ids whose storage
    /// entry is gone (e.g. already expired) are silently skipped; an empty
    /// index yields an empty vec.
    pub async fn query(&self, query: Query) -> LogResult<Vec<LogRecord>> {
        let shared = &self.shared;
        let tag = query.resolve_tag()?;

        let max = query.max_ts.map(to_epoch_secs).unwrap_or(f64::INFINITY);
        let min = query.min_ts.map(to_epoch_secs).unwrap_or(0.0);
        let (offset, count) = match query.limit {
            Some(limit) => (Some(0), Some(limit)),
            None => (None, None),
        };

        let members = shared
            .store
            .zrevrangebyscore(&shared.keys.flow(&tag), max, min, offset, count)
            .await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let record_keys: Vec<String> = members
            .iter()
            .filter_map(|member| member.parse::<u64>().ok())
            .map(|id| shared.keys.record(id))
            .collect();
        let raw = shared.store.mget(&record_keys).await?;

        let mut records = Vec::with_capacity(raw.len());
        for bytes in raw.into_iter().flatten() {
            records.push(LogRecord::decode(&bytes)?);
        }
        debug!(tag = %tag, count = records.len(), "query resolved");
        Ok(records)
    }

    /// The most recent record matching a query, if any.
    pub async fn get_latest(&self, query: Query) -> LogResult<Option<LogRecord>> {
        let records = self.query(query.limit(1)).await?;
        Ok(records.into_iter().next())
    }

    /// Open an engine-level live tail on the broadcast channel. Prefer
    /// [`LoggerHandle::subscribe`] for the per-unit subscription the usual
    /// subscribe/listen/unsubscribe flow expects.
    pub async fn subscribe(&self) -> LogResult<LiveTail> {
        let sub = self
            .shared
            .store
            .subscribe(&self.shared.keys.channel())
            .await?;
        Ok(LiveTail {
            store: self.shared.store.clone(),
            sub: Arc::new(sub),
        })
    }

    /// Expiration sweep: remove every record whose deadline is at or
    /// before `cutoff` (defaults to now), invoking the archival callback
    /// per record first. Returns the number of records removed.
    ///
    /// An archival failure propagates before any removal executes, so the
    /// failed record and all unprocessed ones stay indexed and the sweep
    /// can be re-run. After a successful sweep, re-running with the same
    /// cutoff returns 0.
    pub async fn expire(
        &self,
        cutoff: impl Into<Option<DateTime<Utc>>>,
        archive: Option<ArchiveFn>,
    ) -> LogResult<usize> {
        let shared = &self.shared;
        let cutoff_secs = to_epoch_secs(cutoff.into().unwrap_or_else(Utc::now));

        let members = shared
            .store
            .zrevrangebyscore(&shared.keys.expire_flow(), cutoff_secs, 0.0, None, None)
            .await?;
        if members.is_empty() {
            return Ok(0);
        }

        let record_keys: Vec<String> = members
            .iter()
            .filter_map(|member| member.parse::<u64>().ok())
            .map(|id| shared.keys.record(id))
            .collect();
        let raw = shared.store.mget(&record_keys).await?;
        let mut records = Vec::with_capacity(raw.len());
        for bytes in raw.into_iter().flatten() {
            records.push(LogRecord::decode(&bytes)?);
        }

        // Call-site callback wins over the configured default.
        if let Some(archive) = archive.as_ref().or(shared.archive.as_ref()) {
            for record in &records {
                archive(record).map_err(|e| LogError::Archive(e.to_string()))?;
            }
        }

        // Group removals per index so each index is one multi-member
        // command, issued only after every record archived.
        let mut by_flow: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for record in &records {
            let member = record.id.to_string();
            by_flow
                .entry(shared.keys.all_flow())
                .or_default()
                .push(member.clone());
            for tag in &record.tags {
                by_flow
                    .entry(shared.keys.flow(tag))
                    .or_default()
                    .push(member.clone());
            }
        }
        for (flow, members) in &by_flow {
            shared.store.zrem(flow, members).await?;
        }
        shared
            .store
            .zremrangebyscore(&shared.keys.expire_flow(), 0.0, cutoff_secs)
            .await?;
        let del_keys: Vec<String> = records
            .iter()
            .map(|record| shared.keys.record(record.id))
            .collect();
        shared.store.del(&del_keys).await?;

        info!(count = records.len(), cutoff = cutoff_secs, "expired log records");
        Ok(records.len())
    }

    /// Delete every record, every index, and the id counter under this
    /// logger's namespace. Not incremental; meant for test isolation and
    /// full resets.
    pub async fn full_cleanup(&self) -> LogResult<()> {
        let shared = &self.shared;
        let mut doomed = shared.store.keys(&shared.keys.record_pattern()).await?;
        doomed.extend(shared.store.keys(&shared.keys.flow_pattern()).await?);
        doomed.push(shared.keys.counter());
        shared.store.del(&doomed).await?;
        info!(keys = doomed.len(), "full cleanup");
        Ok(())
    }
}

/// A live-tail subscription to the broadcast channel.
///
/// Clones share the subscription, so one execution unit can block in
/// [`next`](Self::next) while another calls
/// [`unsubscribe`](Self::unsubscribe) to end the sequence.
#[derive(Clone)]
pub struct LiveTail {
    store: Arc<dyn KvStore>,
    sub: Arc<Subscription>,
}

impl LiveTail {
    /// The next published record. Control acknowledgements are filtered
    /// out; `Ok(None)` means the subscription was detached and the
    /// sequence is over. A decode error does not end the sequence; the
    /// call is restartable.
    pub async fn next(&self) -> LogResult<Option<LogRecord>> {
        loop {
            match self.sub.recv().await {
                Some(ChannelMessage::Data(bytes)) => {
                    return Ok(Some(LogRecord::decode(&bytes)?))
                }
                Some(ChannelMessage::Subscribed) => continue,
                Some(ChannelMessage::Unsubscribed) | None => return Ok(None),
            }
        }
    }

    /// Detach from the channel; a blocked [`next`](Self::next) returns
    /// `Ok(None)`.
    pub async fn unsubscribe(&self) -> LogResult<()> {
        self.store.unsubscribe(&self.sub).await?;
        Ok(())
    }
}

/// Per-execution-unit logger handle: the engine plus this unit's ambient
/// context and live-tail subscription.
///
/// Obtain one per task or thread via [`TagLogger::handle`]; handles are not
/// meant to be shared between units. Engine-level operations (`query`,
/// `get_latest`, `expire`, `full_cleanup`) are reachable through `Deref`.
pub struct LoggerHandle {
    engine: TagLogger,
    context: ContextStore,
    tail: Mutex<Option<LiveTail>>,
}

impl LoggerHandle {
    /// Write one record, merging this handle's ambient tags and
    /// attributes. Call-site annotations win on attribute collisions.
    pub async fn log(&self, entry: impl Into<LogEntry>) -> LogResult<()> {
        self.engine
            .log_in_context(entry.into(), &self.context.snapshot())
            .await
    }

    /// Open a nested context scope. The annotations apply to every record
    /// logged while the guard lives; dropping the guard restores the
    /// exact prior context, also on error and panic paths.
    pub fn scope(&self, annotations: impl IntoIterator<Item = Annotation>) -> ContextScope<'_> {
        let annotations: Vec<Annotation> = annotations.into_iter().collect();
        self.context.enter(&annotations)
    }

    /// Add annotations to the current context (not scoped; visible until
    /// removed or reset).
    pub fn add_annotations(&self, annotations: impl IntoIterator<Item = Annotation>) {
        let annotations: Vec<Annotation> = annotations.into_iter().collect();
        self.context.add(&annotations);
    }

    /// Remove annotations from the current context.
    pub fn rm_annotations(&self, annotations: impl IntoIterator<Item = Annotation>) {
        let annotations: Vec<Annotation> = annotations.into_iter().collect();
        self.context.remove(&annotations);
    }

    pub fn add_tags<S: Into<String>>(&self, tags: impl IntoIterator<Item = S>) {
        self.context.add_tags(tags.into_iter().map(Into::into));
    }

    pub fn rm_tags<'a>(&self, tags: impl IntoIterator<Item = &'a str>) {
        self.context.rm_tags(tags);
    }

    pub fn add_attrs<S: Into<String>, V: Into<Value>>(
        &self,
        attrs: impl IntoIterator<Item = (S, V)>,
    ) {
        self.context
            .add_attrs(attrs.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    pub fn rm_attrs<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        self.context.rm_attrs(keys);
    }

    /// Clear this handle's ambient tags and attributes unconditionally.
    pub fn reset_context(&self) {
        self.context.reset();
    }

    /// Tags currently active in this handle's context.
    pub fn active_tags(&self) -> Vec<String> {
        self.context.active_tags()
    }

    /// Attributes currently active in this handle's context.
    pub fn active_attrs(&self) -> BTreeMap<String, Value> {
        self.context.active_attrs()
    }

    /// Bind this handle to the broadcast channel. Replaces any previous
    /// subscription held by the handle.
    pub async fn subscribe(&self) -> LogResult<()> {
        let tail = self.engine.subscribe().await?;
        *self.tail.lock() = Some(tail);
        Ok(())
    }

    /// The next record published on the channel, blocking until one
    /// arrives. `Ok(None)` once [`unsubscribe`](Self::unsubscribe) has
    /// detached the handle.
    pub async fn next_record(&self) -> LogResult<Option<LogRecord>> {
        let tail = self.tail.lock().clone();
        match tail {
            Some(tail) => tail.next().await,
            None => Err(LogError::Subscribe(
                "subscribe() has not been called on this handle".to_string(),
            )),
        }
    }

    /// A clone of this handle's live tail, e.g. to let another execution
    /// unit cancel a blocked [`next_record`](Self::next_record).
    pub fn tail(&self) -> Option<LiveTail> {
        self.tail.lock().clone()
    }

    /// Detach the handle's subscription; a blocked
    /// [`next_record`](Self::next_record) returns `Ok(None)`.
    pub async fn unsubscribe(&self) -> LogResult<()> {
        let tail = self.tail.lock().take();
        if let Some(tail) = tail {
            tail.unsubscribe().await?;
        }
        Ok(())
    }
}

impl std::ops::Deref for LoggerHandle {
    type Target = TagLogger;

    fn deref(&self) -> &TagLogger {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn logger() -> TagLogger {
        TagLogger::builder().build(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn expiry_resolution() {
        let ts = DateTime::from_timestamp(1325376000, 0).unwrap();
        assert_eq!(Expiry::from(1u64).resolve(ts), 1325376001.0);
        assert_eq!(Expiry::from(Duration::days(1)).resolve(ts), 1325462400.0);
        let deadline = DateTime::from_timestamp(1325380000, 0).unwrap();
        assert_eq!(Expiry::At(deadline).resolve(ts), 1325380000.0);
    }

    #[test]
    fn query_attr_filter_translates_to_tag() {
        let q = Query::new().attr("user", "foo");
        assert_eq!(q.resolve_tag().unwrap(), "user:foo");
    }

    #[test]
    fn query_defaults_to_universal_tag() {
        assert_eq!(Query::new().resolve_tag().unwrap(), ALL_TAG);
    }

    #[test]
    fn query_rejects_two_filter_pairs() {
        let q = Query::new().attr("user", "foo").attr("ip", "127.0.0.1");
        assert!(matches!(q.resolve_tag(), Err(LogError::InvalidFilter(_))));
    }

    #[test]
    fn query_rejects_filter_plus_tag() {
        let q = Query::new().tag("foo").attr("user", "foo");
        assert!(matches!(q.resolve_tag(), Err(LogError::InvalidFilter(_))));
    }

    #[tokio::test]
    async fn ids_increase_per_writer() {
        let logger = logger();
        for _ in 0..3 {
            logger.log("tick").await.unwrap();
        }
        let records = logger.query(Query::new()).await.unwrap();
        let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn listening_before_subscribing_is_an_error() {
        let logger = logger();
        let handle = logger.handle();
        assert!(matches!(
            handle.next_record().await,
            Err(LogError::Subscribe(_))
        ));
    }
}
