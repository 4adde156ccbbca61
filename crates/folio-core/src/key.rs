use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Named parameters substituted into a query by the content source.
pub type QueryParams = BTreeMap<String, Value>;

const SEPARATOR: &str = "::";

/// Deterministic identifier for a (query, params) pair.
///
/// Parameters are serialized canonically: object keys are sorted at every
/// depth and no whitespace is emitted, so two calls that differ only in
/// parameter ordering share one key. Missing and empty parameter maps are
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(query: &str, params: Option<&QueryParams>) -> Self {
        let mut key = String::with_capacity(query.len() + 16);
        key.push_str(query);
        key.push_str(SEPARATOR);

        key.push('{');
        if let Some(params) = params {
            // BTreeMap iterates in key order already.
            for (i, (name, value)) in params.iter().enumerate() {
                if i > 0 {
                    key.push(',');
                }
                write_json_string(&mut key, name);
                key.push(':');
                write_canonical(&mut key, value);
            }
        }
        key.push('}');

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substring test used by pattern invalidation.
    pub fn contains(&self, pattern: &str) -> bool {
        self.0.contains(pattern)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Serialize `value` with object keys sorted recursively.
///
/// Does not depend on serde_json's `preserve_order` feature being off.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (name, value)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(out, name);
                out.push(':');
                write_canonical(out, value);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        // Scalars have a single serialization.
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_json_string(out: &mut String, s: &str) {
    out.push_str(&Value::String(s.to_owned()).to_string());
}
