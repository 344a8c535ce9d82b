//! Ambient context: per-execution-unit tags and attributes.
//!
//! Every [`LoggerHandle`](crate::LoggerHandle) owns one context store. Tags
//! and attributes active in it are merged into every record the handle
//! logs. Mutators change the state in place; [`ContextStore::enter`] opens
//! a scope whose guard restores the exact prior state when dropped, on
//! normal and unwind paths alike.
//!
//! Handles are per execution unit, so the context never needs cross-unit
//! synchronization; the mutex below only decouples the scope guard from the
//! handle borrow.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::tagging::{push_tag, Annotation};

/// The active tag list and attribute map of one context.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ContextState {
    pub tags: Vec<String>,
    pub attrs: BTreeMap<String, Value>,
}

impl ContextState {
    fn apply(&mut self, annotations: &[Annotation]) {
        for annotation in annotations {
            annotation.expand(&mut self.tags, &mut self.attrs);
        }
    }

    fn retract(&mut self, annotations: &[Annotation]) {
        for annotation in annotations {
            annotation.retract(&mut self.tags, &mut self.attrs);
        }
    }
}

/// Per-handle context storage.
#[derive(Debug, Default)]
pub(crate) struct ContextStore {
    state: Mutex<ContextState>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep copy of the current state, for merging into a record.
    pub fn snapshot(&self) -> ContextState {
        self.state.lock().clone()
    }

    /// Open a scope: apply the annotations now, restore the prior state
    /// when the returned guard drops.
    pub fn enter(&self, annotations: &[Annotation]) -> ContextScope<'_> {
        let mut state = self.state.lock();
        let saved = state.clone();
        state.apply(annotations);
        ContextScope {
            store: self,
            saved: Some(saved),
        }
    }

    pub fn add(&self, annotations: &[Annotation]) {
        self.state.lock().apply(annotations);
    }

    pub fn remove(&self, annotations: &[Annotation]) {
        self.state.lock().retract(annotations);
    }

    pub fn add_tags<I: IntoIterator<Item = String>>(&self, tags: I) {
        let mut state = self.state.lock();
        for tag in tags {
            push_tag(&mut state.tags, tag);
        }
    }

    pub fn rm_tags<'a, I: IntoIterator<Item = &'a str>>(&self, tags: I) {
        let mut state = self.state.lock();
        for tag in tags {
            state.tags.retain(|t| t != tag);
        }
    }

    pub fn add_attrs<I: IntoIterator<Item = (String, Value)>>(&self, attrs: I) {
        let mut state = self.state.lock();
        for (key, value) in attrs {
            state.attrs.insert(key, value);
        }
    }

    pub fn rm_attrs<'a, I: IntoIterator<Item = &'a str>>(&self, keys: I) {
        let mut state = self.state.lock();
        for key in keys {
            state.attrs.remove(key);
        }
    }

    /// Clear tags and attributes unconditionally.
    pub fn reset(&self) {
        *self.state.lock() = ContextState::default();
    }

    pub fn active_tags(&self) -> Vec<String> {
        self.state.lock().tags.clone()
    }

    pub fn active_attrs(&self) -> BTreeMap<String, Value> {
        self.state.lock().attrs.clone()
    }
}

/// Guard for a nested context scope.
///
/// Dropping it restores the tag list and attribute map to their exact
/// values from before [`ContextStore::enter`], also when the scope is left
/// through a panic or an early `?` return.
#[must_use = "the scope ends when this guard is dropped"]
pub struct ContextScope<'a> {
    store: &'a ContextStore,
    saved: Option<ContextState>,
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.store.state.lock() = saved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagging::{attr, tag, tagging};
    use serde_json::json;

    #[test]
    fn mutators_change_state_in_place() {
        let ctx = ContextStore::new();
        ctx.add_tags(vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        ctx.add_attrs(vec![("user".to_string(), json!("foo"))]);
        assert_eq!(ctx.active_tags(), vec!["a", "b"]);
        assert_eq!(ctx.active_attrs().get("user"), Some(&json!("foo")));

        ctx.rm_tags(["a"]);
        ctx.rm_attrs(["user"]);
        assert_eq!(ctx.active_tags(), vec!["b"]);
        assert!(ctx.active_attrs().is_empty());
    }

    #[test]
    fn scope_restores_prior_state() {
        let ctx = ContextStore::new();
        ctx.add_tags(vec!["outer".to_string()]);
        {
            let _scope = ctx.enter(&[tag("inner"), tagging("user", "foo")]);
            assert_eq!(ctx.active_tags(), vec!["outer", "inner", "user:foo"]);
            assert_eq!(ctx.active_attrs().get("user"), Some(&json!("foo")));
        }
        assert_eq!(ctx.active_tags(), vec!["outer"]);
        assert!(ctx.active_attrs().is_empty());
    }

    #[test]
    fn nested_scopes_unwind_in_order() {
        let ctx = ContextStore::new();
        let outer = ctx.enter(&[attr("depth", 1)]);
        {
            let _inner = ctx.enter(&[attr("depth", 2)]);
            assert_eq!(ctx.active_attrs().get("depth"), Some(&json!(2)));
        }
        assert_eq!(ctx.active_attrs().get("depth"), Some(&json!(1)));
        drop(outer);
        assert!(ctx.active_attrs().is_empty());
    }

    #[test]
    fn scope_restores_on_error_path() {
        fn failing(ctx: &ContextStore) -> Result<(), &'static str> {
            let _scope = ctx.enter(&[tag("doomed")]);
            Err("boom")?;
            Ok(())
        }

        let ctx = ContextStore::new();
        assert!(failing(&ctx).is_err());
        assert!(ctx.active_tags().is_empty());
    }

    #[test]
    fn scope_restores_on_panic() {
        let ctx = ContextStore::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = ctx.enter(&[tag("doomed")]);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(ctx.active_tags().is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let ctx = ContextStore::new();
        ctx.add(&[tagging("user", "foo"), tag("x")]);
        ctx.reset();
        assert!(ctx.active_tags().is_empty());
        assert!(ctx.active_attrs().is_empty());
    }

    #[test]
    fn remove_retracts_tagging_pair() {
        let ctx = ContextStore::new();
        ctx.add(&[tagging("user", "foo"), attr("ip", "127.0.0.1")]);
        ctx.remove(&[tagging("user", "foo")]);
        assert!(ctx.active_tags().is_empty());
        assert_eq!(ctx.active_attrs().get("ip"), Some(&json!("127.0.0.1")));
    }
}
