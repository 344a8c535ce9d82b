//! The log record model and its wire codec.
//!
//! A record is immutable once written. It travels through the store and the
//! broadcast channel as one self-describing JSON object:
//!
//! ```text
//! { "id": 7, "ts": 1325376000.0, "message": "...",
//!   "attrs": {...}, "tags": [...], "expire": 1325376001.0 }
//! ```
//!
//! Timestamps are float epoch seconds (UTC); the same value doubles as the
//! index score.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LogResult;
use crate::format::format_message;
use crate::time::from_epoch_secs;

/// A record's message: opaque text or a structured payload.
///
/// Text messages may carry `{key}` placeholders rendered lazily against the
/// record's attributes, see [`LogRecord::rendered`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Plain or templated text
    Text(String),
    /// Arbitrary structured payload
    Structured(Value),
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Structured(value)
    }
}

/// One immutable logged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Process-unique, monotonically increasing id
    pub id: u64,
    /// Seconds since epoch (UTC); also the index score
    pub ts: f64,
    /// Message text or structured payload
    pub message: Message,
    /// Merged attributes (explicit, tagging shorthand, ambient context)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, Value>,
    /// Deduplicated tag union
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Absolute expiry deadline in epoch seconds, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire: Option<f64>,
}

impl LogRecord {
    /// Encode to the JSON wire form.
    pub fn encode(&self) -> LogResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode from the JSON wire form.
    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The record timestamp as a datetime.
    pub fn timestamp(&self) -> DateTime<Utc> {
        from_epoch_secs(self.ts)
    }

    /// The expiry deadline as a datetime, if the record expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expire.map(from_epoch_secs)
    }

    /// Whether the record carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Render the message: text templates are formatted against the
    /// record's attributes, structured payloads print as compact JSON.
    pub fn rendered(&self) -> String {
        match &self.message {
            Message::Text(template) => format_message(template, &self.attrs),
            Message::Structured(value) => value.to_string(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> LogRecord {
        LogRecord {
            id: 7,
            ts: 1325376000.5,
            message: Message::from("{user} is from {ip}"),
            attrs: [
                ("user".to_string(), json!("foo")),
                ("ip".to_string(), json!("127.0.0.1")),
            ]
            .into_iter()
            .collect(),
            tags: vec!["user:foo".to_string(), "ip:127.0.0.1".to_string()],
            expire: Some(1325376060.0),
        }
    }

    #[test]
    fn round_trips_all_fields() {
        let record = sample();
        let decoded = LogRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn minimal_record_omits_empty_fields() {
        let record = LogRecord {
            id: 1,
            ts: 1.0,
            message: Message::from("foo"),
            attrs: BTreeMap::new(),
            tags: Vec::new(),
            expire: None,
        };
        let encoded = record.encode().unwrap();
        let raw: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(raw, json!({"id": 1, "ts": 1.0, "message": "foo"}));
        assert_eq!(LogRecord::decode(&encoded).unwrap(), record);
    }

    #[test]
    fn structured_message_survives() {
        let mut record = sample();
        record.message = Message::from(json!({"event": "login", "ok": true}));
        let decoded = LogRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded.message, record.message);
    }

    #[test]
    fn display_formats_template() {
        let record = sample();
        assert_eq!(record.to_string(), "foo is from 127.0.0.1");
    }

    #[test]
    fn timestamp_conversion() {
        let record = sample();
        assert_eq!(record.timestamp().timestamp(), 1325376000);
        assert_eq!(record.expires_at().unwrap().timestamp(), 1325376060);
    }

    #[test]
    fn has_tag_matches_exactly() {
        let record = sample();
        assert!(record.has_tag("user:foo"));
        assert!(!record.has_tag("user"));
    }
}
