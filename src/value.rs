use std::collections::BTreeMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// A dynamically-typed value.
///
/// `Value` is used uniformly for user attributes, targeting conditions, feature values, and
/// experiment variations. It is untagged, so it maps one-to-one onto JSON.
///
/// Equality is structural (deep).
///
/// # Examples
/// ```
/// # use growthbook_core::Value;
/// let flag: Value = true.into();
/// let price: Value = 9.99.into();
/// let name: Value = "checkout".into();
/// assert!(flag.is_on());
/// assert_eq!(name.as_str(), Some("checkout"));
/// assert_eq!(price.type_name(), "number");
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum Value {
    /// JSON `null`.
    #[default]
    Null,
    /// A boolean value.
    Bool(bool),
    /// A number. All numbers are 64-bit floats, as in JSON.
    Number(f64),
    /// A string value.
    String(String),
    /// An ordered list of values.
    Array(Vec<Value>),
    /// A string-keyed map of values.
    Object(BTreeMap<String, Value>),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            // Every JSON number is representable (with possible precision loss) as f64.
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(values) => {
                Value::Array(values.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl Value {
    /// Create an empty object.
    pub fn empty_object() -> Value {
        Value::Object(BTreeMap::new())
    }

    #[allow(missing_docs)]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[allow(missing_docs)]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a direct child of an object. Returns `None` for non-objects.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?.get(key)
    }

    /// Resolve a dot-separated path (e.g., `"company.address.country"`).
    ///
    /// Only object levels are traversed. A path segment applied to an array (or any other
    /// non-object) resolves to `None`, the same as a missing key.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(self, |current, segment| current.get(segment))
    }

    /// Name of the runtime type, as used by the `$type` condition operator.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Returns `false` if the value is "off": null, `false`, `0`, or an empty string. All other
    /// values (including empty arrays and objects) are "on".
    pub fn is_on(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// String form of a primitive value. Returns `None` for null, arrays, and objects.
    ///
    /// Integral numbers are rendered without fractional part (`123`, not `123.0`) so that hashing
    /// a numeric attribute gives the same result as hashing its string form.
    pub fn to_primitive_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(format_number(*n)),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}
