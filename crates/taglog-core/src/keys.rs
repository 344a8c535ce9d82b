//! Key naming scheme for the backing store.
//!
//! Every key the engine touches is derived here, scoped under an optional
//! configured prefix so several loggers can share one store:
//!
//! - `<prefix:>msg:<id>` for record storage
//! - `<prefix:>flow:<tag>` for the per-tag index (`__all__` universal,
//!   `__expire__` pending expiration)
//! - `<prefix:>counter` for the id counter
//! - `<prefix:>log-records` as the broadcast channel

/// Universal tag: every record is indexed under it.
pub const ALL_TAG: &str = "__all__";

/// Reserved tag for the pending-expiration index.
pub const EXPIRE_TAG: &str = "__expire__";

/// Broadcast channel name (before prefixing).
pub const BROADCAST_CHANNEL: &str = "log-records";

/// Prefix-scoped key builder shared by all engine operations.
#[derive(Debug, Clone, Default)]
pub struct KeySpace {
    prefix: Option<String>,
}

impl KeySpace {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn scoped(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    /// Storage key for a record id.
    pub fn record(&self, id: u64) -> String {
        self.scoped(&format!("msg:{id}"))
    }

    /// Index key for a tag.
    pub fn flow(&self, tag: &str) -> String {
        self.scoped(&format!("flow:{tag}"))
    }

    /// The universal index holding every record.
    pub fn all_flow(&self) -> String {
        self.flow(ALL_TAG)
    }

    /// The pending-expiration index, scored by expiry deadline.
    pub fn expire_flow(&self) -> String {
        self.flow(EXPIRE_TAG)
    }

    /// The atomic id counter.
    pub fn counter(&self) -> String {
        self.scoped("counter")
    }

    /// The live-tail broadcast channel.
    pub fn channel(&self) -> String {
        self.scoped(BROADCAST_CHANNEL)
    }

    /// Glob pattern matching every record storage key.
    pub fn record_pattern(&self) -> String {
        self.scoped("msg:*")
    }

    /// Glob pattern matching every index key.
    pub fn flow_pattern(&self) -> String {
        self.scoped("flow:*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprefixed_keys() {
        let keys = KeySpace::new(None);
        assert_eq!(keys.record(42), "msg:42");
        assert_eq!(keys.flow("user:foo"), "flow:user:foo");
        assert_eq!(keys.all_flow(), "flow:__all__");
        assert_eq!(keys.expire_flow(), "flow:__expire__");
        assert_eq!(keys.counter(), "counter");
        assert_eq!(keys.channel(), "log-records");
    }

    #[test]
    fn prefixed_keys() {
        let keys = KeySpace::new(Some("app".to_string()));
        assert_eq!(keys.record(1), "app:msg:1");
        assert_eq!(keys.flow("bar"), "app:flow:bar");
        assert_eq!(keys.counter(), "app:counter");
        assert_eq!(keys.channel(), "app:log-records");
        assert_eq!(keys.record_pattern(), "app:msg:*");
        assert_eq!(keys.flow_pattern(), "app:flow:*");
    }
}
