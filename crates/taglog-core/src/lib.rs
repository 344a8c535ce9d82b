//! Taglog Core Library
//!
//! Tagged, queryable event-log store over a key/value backing store.
//!
//! ## Overview
//!
//! Producers emit structured log records annotated with tags and
//! attributes. Records land in one time-ordered index per tag (plus a
//! universal index), can be queried back by tag and time range, tailed
//! live over a broadcast channel, and expired after a deadline with an
//! optional archival hook.
//!
//! The backing store is anything implementing [`KvStore`]: atomic
//! counters, string values, sorted sets, publish/subscribe. A concurrent
//! in-memory implementation ([`MemoryStore`]) ships with the crate.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use taglog_core::{tagging, MemoryStore, Query, TagLogger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let logger = TagLogger::builder()
//!         .prefix("app")
//!         .build(Arc::new(MemoryStore::new()));
//!
//!     // Each task/thread gets its own handle with its own ambient context.
//!     let handle = logger.handle();
//!     {
//!         let _scope = handle.scope([tagging("user", "foo")]);
//!         handle.log("{user} connected").await?;
//!     }
//!
//!     // Query back by the derived tag.
//!     let latest = logger.get_latest(Query::new().attr("user", "foo")).await?;
//!     println!("{}", latest.expect("just logged"));
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod format;
pub mod keys;
pub mod record;
pub mod store;
pub mod tagging;
pub mod time;

// Re-exports
pub use context::ContextScope;
pub use engine::{
    ArchiveFn, Expiry, LiveTail, LogEntry, LoggerHandle, Query, TagLogger, TagLoggerBuilder,
};
pub use error::{LogError, LogResult};
pub use format::{format_message, MISSING_PLACEHOLDER};
pub use keys::{KeySpace, ALL_TAG, BROADCAST_CHANNEL, EXPIRE_TAG};
pub use record::{LogRecord, Message};
pub use store::{ChannelMessage, KvStore, MemoryStore, StoreError, Subscription};
pub use tagging::{attr, tag, tagging, Annotation};
