//! Record annotations: tags, attributes, and tagging attributes.
//!
//! A tagging attribute is a key/value pair that is stored as an attribute
//! *and* materialized as a derived tag `"key:value"`, so records can be
//! queried back by the pair. The three kinds are one explicit enum with a
//! uniform expansion into (tags, attrs), instead of inspecting argument
//! types at runtime.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::format::value_label;

/// One annotation attached to a log call or an ambient context.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    /// A plain tag
    Tag(String),
    /// A plain attribute
    Attr(String, Value),
    /// A tagging attribute: attribute plus derived `"key:value"` tag
    Tagging(String, Value),
}

/// Shorthand for [`Annotation::Tag`].
pub fn tag(name: impl Into<String>) -> Annotation {
    Annotation::Tag(name.into())
}

/// Shorthand for [`Annotation::Attr`].
pub fn attr(key: impl Into<String>, value: impl Into<Value>) -> Annotation {
    Annotation::Attr(key.into(), value.into())
}

/// Shorthand for [`Annotation::Tagging`].
pub fn tagging(key: impl Into<String>, value: impl Into<Value>) -> Annotation {
    Annotation::Tagging(key.into(), value.into())
}

impl Annotation {
    /// The derived tag for a tagging attribute pair.
    pub(crate) fn derived_tag(key: &str, value: &Value) -> String {
        format!("{key}:{}", value_label(value))
    }

    /// Merge this annotation into an accumulating tag list and attribute
    /// map. Tags are deduplicated preserving first-seen order; attribute
    /// inserts overwrite, so later (more specific) sources win.
    pub fn expand(&self, tags: &mut Vec<String>, attrs: &mut BTreeMap<String, Value>) {
        match self {
            Annotation::Tag(name) => push_tag(tags, name.clone()),
            Annotation::Attr(key, value) => {
                attrs.insert(key.clone(), value.clone());
            }
            Annotation::Tagging(key, value) => {
                push_tag(tags, Self::derived_tag(key, value));
                attrs.insert(key.clone(), value.clone());
            }
        }
    }

    /// Remove this annotation's contribution from a tag list and attribute
    /// map (the inverse of [`expand`](Self::expand)).
    pub fn retract(&self, tags: &mut Vec<String>, attrs: &mut BTreeMap<String, Value>) {
        match self {
            Annotation::Tag(name) => tags.retain(|t| t != name),
            Annotation::Attr(key, _) => {
                attrs.remove(key);
            }
            Annotation::Tagging(key, value) => {
                let derived = Self::derived_tag(key, value);
                tags.retain(|t| t != &derived);
                attrs.remove(key);
            }
        }
    }
}

/// Append a tag unless it is already present.
pub(crate) fn push_tag(tags: &mut Vec<String>, tag: String) {
    if !tags.contains(&tag) {
        tags.push(tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_expands_to_tag_only() {
        let mut tags = Vec::new();
        let mut attrs = BTreeMap::new();
        tag("foo").expand(&mut tags, &mut attrs);
        assert_eq!(tags, vec!["foo"]);
        assert!(attrs.is_empty());
    }

    #[test]
    fn attr_expands_to_attr_only() {
        let mut tags = Vec::new();
        let mut attrs = BTreeMap::new();
        attr("user", "foo").expand(&mut tags, &mut attrs);
        assert!(tags.is_empty());
        assert_eq!(attrs.get("user"), Some(&json!("foo")));
    }

    #[test]
    fn tagging_expands_to_both() {
        let mut tags = Vec::new();
        let mut attrs = BTreeMap::new();
        tagging("user", "foo").expand(&mut tags, &mut attrs);
        assert_eq!(tags, vec!["user:foo"]);
        assert_eq!(attrs.get("user"), Some(&json!("foo")));
    }

    #[test]
    fn duplicate_tags_are_suppressed() {
        let mut tags = Vec::new();
        let mut attrs = BTreeMap::new();
        tag("foo").expand(&mut tags, &mut attrs);
        tag("foo").expand(&mut tags, &mut attrs);
        tagging("user", "x").expand(&mut tags, &mut attrs);
        tag("user:x").expand(&mut tags, &mut attrs);
        assert_eq!(tags, vec!["foo", "user:x"]);
    }

    #[test]
    fn later_attr_overwrites() {
        let mut tags = Vec::new();
        let mut attrs = BTreeMap::new();
        attr("user", "ambient").expand(&mut tags, &mut attrs);
        attr("user", "explicit").expand(&mut tags, &mut attrs);
        assert_eq!(attrs.get("user"), Some(&json!("explicit")));
    }

    #[test]
    fn retract_undoes_expand() {
        let mut tags = Vec::new();
        let mut attrs = BTreeMap::new();
        let ann = tagging("ip", "127.0.0.1");
        ann.expand(&mut tags, &mut attrs);
        ann.retract(&mut tags, &mut attrs);
        assert!(tags.is_empty());
        assert!(attrs.is_empty());
    }

    #[test]
    fn numeric_tagging_value_in_derived_tag() {
        assert_eq!(Annotation::derived_tag("port", &json!(6379)), "port:6379");
    }
}
