//! Lazy message formatting against record attributes.
//!
//! Text messages may carry `{key}` placeholders that are substituted from
//! the record's attributes at render time, not at log time. The rules are
//! fixed rather than delegated to a general formatting library:
//!
//! - `{key}` present in attrs → the attribute value (strings bare, other
//!   values as compact JSON)
//! - `{key}` absent from attrs → the literal placeholder `<missing>`
//! - attributes never referenced by the template → appended to the rendered
//!   string as trailing ` key=value` annotations, in key order
//! - `{{` and `}}` → literal braces

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::Value;

/// Rendered in place of a template key with no matching attribute.
pub const MISSING_PLACEHOLDER: &str = "<missing>";

/// Render an attribute value for interpolation: strings bare, everything
/// else as compact JSON.
pub(crate) fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Format a message template against a set of attributes.
pub fn format_message(template: &str, attrs: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut used: BTreeSet<&str> = BTreeSet::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    // unterminated placeholder, keep it literal
                    out.push('{');
                    out.push_str(&key);
                } else {
                    match attrs.get_key_value(key.as_str()) {
                        Some((k, value)) => {
                            used.insert(k.as_str());
                            out.push_str(&value_label(value));
                        }
                        None => out.push_str(MISSING_PLACEHOLDER),
                    }
                }
            }
            _ => out.push(c),
        }
    }

    for (key, value) in attrs {
        if !used.contains(key.as_str()) {
            out.push(' ');
            out.push_str(key);
            out.push('=');
            out.push_str(&value_label(value));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitutes_known_keys() {
        let attrs = attrs(&[("user", json!("foo")), ("ip", json!("127.0.0.1"))]);
        assert_eq!(
            format_message("{user} is from {ip}", &attrs),
            "foo is from 127.0.0.1"
        );
    }

    #[test]
    fn missing_key_renders_placeholder() {
        let attrs = attrs(&[("user", json!("foo"))]);
        assert_eq!(
            format_message("{user} did {action}", &attrs),
            "foo did <missing>"
        );
    }

    #[test]
    fn unused_attrs_are_appended_in_key_order() {
        let attrs = attrs(&[("zeta", json!(1)), ("alpha", json!("x"))]);
        assert_eq!(format_message("hello", &attrs), "hello alpha=x zeta=1");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let attrs = attrs(&[("count", json!(3)), ("ok", json!(true))]);
        assert_eq!(format_message("{count}/{ok}", &attrs), "3/true");
    }

    #[test]
    fn escaped_braces_stay_literal() {
        let attrs = BTreeMap::new();
        assert_eq!(format_message("{{not a key}}", &attrs), "{not a key}");
    }

    #[test]
    fn unterminated_placeholder_stays_literal() {
        let attrs = BTreeMap::new();
        assert_eq!(format_message("oops {key", &attrs), "oops {key");
    }

    #[test]
    fn no_attrs_no_suffix() {
        let attrs = BTreeMap::new();
        assert_eq!(format_message("plain", &attrs), "plain");
    }
}
