//! Canonical query strings
//!
//! The same canonical form is used for the signature and for the request URL;
//! if the two ever diverge the service rejects the signature.
//!
//! Rules:
//! - keys sorted lexicographically (byte order)
//! - array values emit one `key=value` pair per element, elements sorted
//! - object values are serialized as JSON text
//! - null serializes to the empty string
//! - keys and values are percent-encoded (RFC 3986 unreserved set kept)

use serde_json::{Map, Value};

fn serialize_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Nested arrays and objects are carried as JSON text
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Build the canonical query string for a parameter map.
///
/// An empty map yields the empty string; an empty array contributes no pairs.
///
/// ```
/// use serde_json::json;
/// use shirushi::signing::build_canonical_query;
///
/// let params = json!({"b": "2", "a": "1"});
/// assert_eq!(build_canonical_query(params.as_object().unwrap()), "a=1&b=2");
/// ```
pub fn build_canonical_query(params: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();

    let mut pairs = Vec::with_capacity(keys.len());
    for key in keys {
        let encoded_key = urlencoding::encode(key);
        match &params[key.as_str()] {
            Value::Array(items) => {
                let mut values: Vec<String> = items.iter().map(serialize_value).collect();
                values.sort();
                for value in values {
                    pairs.push(format!("{}={}", encoded_key, urlencoding::encode(&value)));
                }
            }
            other => {
                pairs.push(format!(
                    "{}={}",
                    encoded_key,
                    urlencoding::encode(&serialize_value(other))
                ));
            }
        }
    }

    pairs.join("&")
}
