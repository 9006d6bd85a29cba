//! Targeting condition matcher.
//!
//! Conditions are MongoDB-like documents, e.g.:
//! ```json
//! {"country": {"$in": ["US", "CA"]}, "$or": [{"age": {"$gte": 18}}, {"verified": true}]}
//! ```
//! Top-level keys other than `$or`, `$nor`, `$and`, and `$not` are dot-separated paths into user
//! attributes. The operator set is closed; unknown operators never match.
use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::Regex;

use crate::{hashing::padded_version_string, Value};

/// Returns `true` if `attributes` satisfy `condition`.
///
/// `condition` must be an object; anything else (including an array) never matches. All keys of
/// the object must pass.
///
/// `saved_groups` is an object mapping group ids to arrays of values, used by `$inGroup` and
/// `$notInGroup`.
///
/// ```
/// # use growthbook_core::{condition::eval_condition, Value};
/// # use serde_json::json;
/// let attributes: Value = json!({"country": "US", "age": 30}).into();
/// let condition: Value = json!({"country": "US", "age": {"$gt": 21}}).into();
/// assert!(eval_condition(&attributes, &condition, None));
/// ```
pub fn eval_condition(attributes: &Value, condition: &Value, saved_groups: Option<&Value>) -> bool {
    let Value::Object(condition) = condition else {
        return false;
    };

    condition.iter().all(|(key, value)| match key.as_str() {
        "$or" => eval_or(attributes, value, saved_groups),
        "$nor" => !eval_or(attributes, value, saved_groups),
        "$and" => eval_and(attributes, value, saved_groups),
        "$not" => !eval_condition(attributes, value, saved_groups),
        path => eval_condition_value(value, attributes.get_path(path), saved_groups),
    })
}

fn eval_or(attributes: &Value, conditions: &Value, saved_groups: Option<&Value>) -> bool {
    let Value::Array(conditions) = conditions else {
        return false;
    };
    conditions.is_empty()
        || conditions
            .iter()
            .any(|condition| eval_condition(attributes, condition, saved_groups))
}

fn eval_and(attributes: &Value, conditions: &Value, saved_groups: Option<&Value>) -> bool {
    let Value::Array(conditions) = conditions else {
        return false;
    };
    conditions
        .iter()
        .all(|condition| eval_condition(attributes, condition, saved_groups))
}

/// Returns `true` if all keys of the object start with `$`.
fn is_operator_object(object: &BTreeMap<String, Value>) -> bool {
    object.keys().all(|key| key.starts_with('$'))
}

/// Match a single attribute value (`None` if absent) against a condition value.
pub fn eval_condition_value(
    condition: &Value,
    attribute: Option<&Value>,
    saved_groups: Option<&Value>,
) -> bool {
    match condition {
        Value::Null => attribute.map_or(true, Value::is_null),

        Value::Bool(_) | Value::Number(_) | Value::String(_) => attribute == Some(condition),

        Value::Array(expected) => {
            let Some(Value::Array(actual)) = attribute else {
                return false;
            };
            expected.len() == actual.len()
                && expected
                    .iter()
                    .zip(actual)
                    .all(|(e, a)| eval_condition_value(e, Some(a), saved_groups))
        }

        Value::Object(operators) if is_operator_object(operators) => {
            operators.iter().all(|(op, expected)| {
                Operator::from_key(op).is_some_and(|op| op.eval(attribute, expected, saved_groups))
            })
        }

        Value::Object(_) => attribute == Some(condition),
    }
}

/// Condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    /// Runtime type name equals the condition string.
    Type,
    /// Negates the nested condition value.
    Not,
    /// `true`: attribute is present and not null. `false`: attribute is absent or null.
    Exists,
    /// Attribute (or any element of an array attribute) is one of the values.
    In,
    /// Negation of `$in`.
    Nin,
    /// Every condition element matches at least one element of the attribute array.
    All,
    /// At least one element of the attribute array matches.
    ElemMatch,
    /// Length of the attribute array matches the condition value.
    Size,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Attribute string matches the regex.
    Regex,
    VersionEq,
    VersionNe,
    VersionGt,
    VersionGte,
    VersionLt,
    VersionLte,
    /// Attribute is a member of the saved group.
    InGroup,
    /// Attribute is not a member of the saved group.
    NotInGroup,
}

impl Operator {
    pub(crate) fn from_key(key: &str) -> Option<Operator> {
        Some(match key {
            "$type" => Self::Type,
            "$not" => Self::Not,
            "$exists" => Self::Exists,
            "$in" => Self::In,
            "$nin" => Self::Nin,
            "$all" => Self::All,
            "$elemMatch" => Self::ElemMatch,
            "$size" => Self::Size,
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$regex" => Self::Regex,
            "$veq" => Self::VersionEq,
            "$vne" => Self::VersionNe,
            "$vgt" => Self::VersionGt,
            "$vgte" => Self::VersionGte,
            "$vlt" => Self::VersionLt,
            "$vlte" => Self::VersionLte,
            "$inGroup" => Self::InGroup,
            "$notInGroup" => Self::NotInGroup,
            _ => {
                log::debug!(target: "growthbook", operator = key; "unknown condition operator");
                return None;
            }
        })
    }

    /// Applying `Operator` to the values. Returns `false` if the operator cannot be applied or
    /// there's a misconfiguration.
    pub(crate) fn eval(
        self,
        attribute: Option<&Value>,
        expected: &Value,
        saved_groups: Option<&Value>,
    ) -> bool {
        self.try_eval(attribute, expected, saved_groups)
            .unwrap_or(false)
    }

    /// Try applying `Operator` to the values, returning `None` if the operator cannot be applied.
    fn try_eval(
        self,
        attribute: Option<&Value>,
        expected: &Value,
        saved_groups: Option<&Value>,
    ) -> Option<bool> {
        let present = attribute.filter(|v| !v.is_null());

        match self {
            Self::Type => {
                let type_name = attribute.map_or("undefined", Value::type_name);
                Some(type_name == expected.as_str()?)
            }

            Self::Not => Some(!eval_condition_value(expected, attribute, saved_groups)),

            Self::Exists => Some(expected.as_bool()? == present.is_some()),

            Self::In | Self::Nin => {
                let expected = expected.as_array()?;
                let is_in = is_in(present?, expected);
                Some(is_in == (self == Self::In))
            }

            Self::InGroup | Self::NotInGroup => {
                let group = saved_groups
                    .and_then(|groups| groups.get(expected.as_str()?))
                    .and_then(Value::as_array)
                    .unwrap_or_default();
                let is_in = present.is_some_and(|value| is_in(value, group));
                Some(is_in == (self == Self::InGroup))
            }

            Self::All => {
                let actual = present?.as_array()?;
                let expected = expected.as_array()?;
                Some(expected.iter().all(|condition| {
                    actual
                        .iter()
                        .any(|value| eval_condition_value(condition, Some(value), saved_groups))
                }))
            }

            Self::ElemMatch => {
                let actual = present?.as_array()?;
                let matches = match expected {
                    Value::Object(object) if is_operator_object(object) => actual
                        .iter()
                        .any(|value| eval_condition_value(expected, Some(value), saved_groups)),
                    _ => actual
                        .iter()
                        .any(|value| eval_condition(value, expected, saved_groups)),
                };
                Some(matches)
            }

            Self::Size => {
                let len = present?.as_array()?.len();
                Some(eval_condition_value(
                    expected,
                    Some(&Value::Number(len as f64)),
                    saved_groups,
                ))
            }

            Self::Eq => Some(attribute.unwrap_or(&Value::Null) == expected),
            Self::Ne => Some(attribute.unwrap_or(&Value::Null) != expected),

            Self::Lt => Some(compare(attribute, expected)? == Ordering::Less),
            Self::Lte => Some(compare(attribute, expected)? != Ordering::Greater),
            Self::Gt => Some(compare(attribute, expected)? == Ordering::Greater),
            Self::Gte => Some(compare(attribute, expected)? != Ordering::Less),

            Self::Regex => {
                let actual = present?.to_primitive_string()?;
                let regex = match Regex::new(expected.as_str()?) {
                    Ok(regex) => regex,
                    Err(err) => {
                        log::debug!(target: "growthbook", "invalid $regex condition: {err}");
                        return None;
                    }
                };
                Some(regex.is_match(&actual))
            }

            Self::VersionEq => Some(compare_versions(present?, expected)? == Ordering::Equal),
            Self::VersionNe => Some(compare_versions(present?, expected)? != Ordering::Equal),
            Self::VersionGt => Some(compare_versions(present?, expected)? == Ordering::Greater),
            Self::VersionGte => Some(compare_versions(present?, expected)? != Ordering::Less),
            Self::VersionLt => Some(compare_versions(present?, expected)? == Ordering::Less),
            Self::VersionLte => Some(compare_versions(present?, expected)? != Ordering::Greater),
        }
    }
}

/// Returns `true` if `actual` is one of `expected`. For array attributes, returns `true` if any
/// element is one of `expected`.
fn is_in(actual: &Value, expected: &[Value]) -> bool {
    match actual {
        Value::Array(values) => values.iter().any(|value| expected.contains(value)),
        _ => expected.contains(actual),
    }
}

/// Compare numerically when both sides are numbers (or numeric strings; absent/null attribute
/// counts as `0`), and as strings otherwise.
fn compare(attribute: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let attribute_number = match attribute {
        None | Some(Value::Null) => Some(0.0),
        Some(value) => as_number(value),
    };
    if let (Some(a), Some(b)) = (attribute_number, as_number(expected)) {
        return a.partial_cmp(&b);
    }

    let a = attribute?.to_primitive_string()?;
    let b = expected.to_primitive_string()?;
    Some(a.cmp(&b))
}

fn compare_versions(attribute: &Value, expected: &Value) -> Option<Ordering> {
    let a = padded_version_string(&attribute.to_primitive_string()?);
    let b = padded_version_string(&expected.to_primitive_string()?);
    Some(a.cmp(&b))
}

/// Numbers, and strings written as decimal literals. `f64::from_str` also accepts `inf` and
/// `NaN`, which are compared as strings instead.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => {
            let s = s.trim();
            let is_decimal = s.bytes().any(|b| b.is_ascii_digit())
                && s.bytes()
                    .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'+' | b'-' | b'e' | b'E'));
            if is_decimal {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}
