//! The attribute data model shared by log records and span mutations, and its
//! JSON serialization.

use std::{fmt, sync::Arc, time::Duration};

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Maximum number of lazy indirections resolved before serialization gives up.
///
/// Lazy values may themselves resolve to lazy values; without a cap a cyclic
/// chain would recurse until the stack overflows. Chains deeper than this
/// fail with [`SerializeError::RecursionLimitExceeded`].
pub const MAX_LAZY_DEPTH: usize = 32;

/// A single key-value pair carried by a [`LogRecord`][crate::LogRecord] or
/// mirrored onto a span.
#[derive(Clone, Debug)]
pub struct Attribute {
    /// The attribute key.
    pub key: String,

    /// The attribute value.
    pub value: AttributeValue,
}

impl Attribute {
    /// Creates a new attribute from anything convertible into an
    /// [`AttributeValue`].
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.key, self.value)
    }
}

/// The closed set of value kinds an [`Attribute`] can carry.
///
/// Groups are ordered sequences of attributes; lazy values defer computation
/// until first serialization and are resolved exactly once per emission.
#[derive(Clone)]
pub enum AttributeValue {
    /// A boolean value.
    Bool(bool),

    /// A 64-bit signed integer.
    I64(i64),

    /// A 64-bit unsigned integer.
    U64(u64),

    /// A 64-bit floating-point number. Non-finite values cannot be
    /// represented in JSON and fail serialization.
    F64(f64),

    /// A string value.
    String(String),

    /// A span of time, rendered in compact form (`"2s"`, `"1m30s"`, `"1.5ms"`).
    Duration(Duration),

    /// A point in time, rendered as an RFC 3339 timestamp.
    Timestamp(OffsetDateTime),

    /// An ordered group of nested attributes, rendered as one JSON object.
    Group(Vec<Attribute>),

    /// A value computed on first access.
    Lazy(Arc<dyn Fn() -> AttributeValue + Send + Sync>),
}

impl AttributeValue {
    /// Creates a lazily-resolved value.
    pub fn lazy(resolve: impl Fn() -> AttributeValue + Send + Sync + 'static) -> Self {
        Self::Lazy(Arc::new(resolve))
    }
}

impl fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => f.debug_tuple("Bool").field(value).finish(),
            Self::I64(value) => f.debug_tuple("I64").field(value).finish(),
            Self::U64(value) => f.debug_tuple("U64").field(value).finish(),
            Self::F64(value) => f.debug_tuple("F64").field(value).finish(),
            Self::String(value) => f.debug_tuple("String").field(value).finish(),
            Self::Duration(value) => f.debug_tuple("Duration").field(value).finish(),
            Self::Timestamp(value) => f.debug_tuple("Timestamp").field(value).finish(),
            Self::Group(value) => f.debug_tuple("Group").field(value).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Duration> for AttributeValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

impl From<OffsetDateTime> for AttributeValue {
    fn from(value: OffsetDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Vec<Attribute>> for AttributeValue {
    fn from(value: Vec<Attribute>) -> Self {
        Self::Group(value)
    }
}

/// Errors that can occur while serializing an [`AttributeValue`].
///
/// These are swallowed at every call site in the pipeline — a value that
/// cannot be serialized is omitted, never allowed to fail an emission.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// A chain of lazy values exceeded [`MAX_LAZY_DEPTH`] indirections.
    #[error("lazy value resolution exceeded {MAX_LAZY_DEPTH} levels")]
    RecursionLimitExceeded,

    /// A float value was NaN or infinite.
    #[error("non-finite float value cannot be represented in JSON")]
    NonFiniteFloat,

    /// A timestamp could not be formatted as RFC 3339.
    #[error("failed to format timestamp: {0}")]
    TimestampFormat(#[from] time::error::Format),

    /// Represents an error during JSON serialization.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes a value into canonical JSON text.
///
/// Groups serialize to a JSON object of their members' *raw* values — one
/// level of JSON marshaling wraps the whole group rather than each member
/// individually. Lazy values are resolved eagerly before serialization.
pub fn serialize(value: &AttributeValue) -> Result<String, SerializeError> {
    Ok(serde_json::to_string(&to_json(value, 0)?)?)
}

/// Converts a value into its raw [`serde_json::Value`] representation.
pub(crate) fn to_json(
    value: &AttributeValue,
    lazy_depth: usize,
) -> Result<serde_json::Value, SerializeError> {
    match value {
        AttributeValue::Bool(value) => Ok(serde_json::Value::from(*value)),
        AttributeValue::I64(value) => Ok(serde_json::Value::from(*value)),
        AttributeValue::U64(value) => Ok(serde_json::Value::from(*value)),
        AttributeValue::F64(value) => serde_json::Number::from_f64(*value)
            .map(serde_json::Value::Number)
            .ok_or(SerializeError::NonFiniteFloat),
        AttributeValue::String(value) => Ok(serde_json::Value::from(value.as_str())),
        AttributeValue::Duration(value) => {
            Ok(serde_json::Value::from(format_duration(*value)))
        }
        AttributeValue::Timestamp(value) => Ok(serde_json::Value::from(value.format(&Rfc3339)?)),
        AttributeValue::Group(members) => {
            let mut object = serde_json::Map::with_capacity(members.len());
            for member in members {
                object.insert(member.key.clone(), to_json(&member.value, lazy_depth)?);
            }
            Ok(serde_json::Value::Object(object))
        }
        AttributeValue::Lazy(resolve) => {
            if lazy_depth >= MAX_LAZY_DEPTH {
                return Err(SerializeError::RecursionLimitExceeded);
            }
            let resolved = resolve();
            to_json(&resolved, lazy_depth + 1)
        }
    }
}

/// Renders a duration in compact single-token form: `"2s"`, `"1m30s"`,
/// `"1h0m5s"`, `"1.5ms"`, `"500µs"`, `"250ns"`, `"0s"`.
fn format_duration(duration: Duration) -> String {
    let total_nanos = duration.as_nanos();
    if total_nanos == 0 {
        return "0s".to_string();
    }
    if total_nanos < 1_000 {
        return format!("{total_nanos}ns");
    }
    if total_nanos < 1_000_000 {
        return format_subsecond(total_nanos, 1_000, "µs");
    }
    if total_nanos < 1_000_000_000 {
        return format_subsecond(total_nanos, 1_000_000, "ms");
    }

    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let mut out = String::new();
    if total_seconds >= 3600 {
        out.push_str(&format!("{hours}h"));
    }
    if total_seconds >= 60 {
        out.push_str(&format!("{minutes}m"));
    }
    let fraction_nanos = duration.subsec_nanos();
    if fraction_nanos == 0 {
        out.push_str(&format!("{seconds}s"));
    } else {
        let fraction = format!("{fraction_nanos:09}");
        out.push_str(&format!("{seconds}.{}s", fraction.trim_end_matches('0')));
    }
    out
}

/// Renders a sub-second duration with up to `unit`-relative fractional digits,
/// trailing zeros trimmed.
fn format_subsecond(total_nanos: u128, unit: u128, suffix: &str) -> String {
    let whole = total_nanos / unit;
    let remainder = total_nanos % unit;
    if remainder == 0 {
        return format!("{whole}{suffix}");
    }
    let width = if unit == 1_000 { 3 } else { 6 };
    let fraction = format!("{remainder:0width$}");
    format!("{whole}.{}{suffix}", fraction.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn primitives_serialize_to_json_scalars() {
        assert_eq!(serialize(&AttributeValue::Bool(true)).unwrap(), "true");
        assert_eq!(serialize(&AttributeValue::I64(-7)).unwrap(), "-7");
        assert_eq!(serialize(&AttributeValue::U64(42)).unwrap(), "42");
        assert_eq!(serialize(&AttributeValue::F64(1.5)).unwrap(), "1.5");
        assert_eq!(
            serialize(&AttributeValue::String("abc".to_string())).unwrap(),
            "\"abc\""
        );
    }

    #[test]
    fn serialized_values_reparse_as_json() {
        let values = [
            AttributeValue::Bool(false),
            AttributeValue::I64(i64::MIN),
            AttributeValue::U64(u64::MAX),
            AttributeValue::F64(0.25),
            AttributeValue::String("x".to_string()),
            AttributeValue::Duration(Duration::from_secs(2)),
            AttributeValue::Timestamp(datetime!(2024-05-01 12:00:00 UTC)),
        ];
        for value in &values {
            let serialized = serialize(value).unwrap();
            serde_json::from_str::<serde_json::Value>(&serialized)
                .unwrap_or_else(|error| panic!("{serialized} failed to reparse: {error}"));
        }
    }

    #[test]
    fn durations_render_in_compact_form() {
        let cases = [
            (Duration::ZERO, "\"0s\""),
            (Duration::from_nanos(250), "\"250ns\""),
            (Duration::from_micros(500), "\"500µs\""),
            (Duration::from_nanos(1_500_000), "\"1.5ms\""),
            (Duration::from_secs(2), "\"2s\""),
            (Duration::from_millis(1_500), "\"1.5s\""),
            (Duration::from_secs(90), "\"1m30s\""),
            (Duration::from_secs(3_605), "\"1h0m5s\""),
        ];
        for (duration, expected) in cases {
            assert_eq!(
                serialize(&AttributeValue::Duration(duration)).unwrap(),
                expected,
                "for {duration:?}"
            );
        }
    }

    #[test]
    fn timestamps_render_as_rfc3339() {
        let value = AttributeValue::Timestamp(datetime!(2024-05-01 12:30:45 UTC));
        assert_eq!(serialize(&value).unwrap(), "\"2024-05-01T12:30:45Z\"");
    }

    #[test]
    fn groups_marshal_raw_member_values_in_order() {
        let group = AttributeValue::Group(vec![
            Attribute::new("key1", "value1"),
            Attribute::new("key2", 123_i64),
        ]);
        assert_eq!(
            serialize(&group).unwrap(),
            r#"{"key1":"value1","key2":123}"#
        );
    }

    #[test]
    fn empty_group_marshals_to_empty_object() {
        assert_eq!(serialize(&AttributeValue::Group(Vec::new())).unwrap(), "{}");
    }

    #[test]
    fn nested_groups_marshal_recursively() {
        let group = AttributeValue::Group(vec![Attribute::new(
            "inner",
            vec![Attribute::new("flag", true)],
        )]);
        assert_eq!(serialize(&group).unwrap(), r#"{"inner":{"flag":true}}"#);
    }

    #[test]
    fn lazy_values_resolve_before_serialization() {
        let value = AttributeValue::lazy(|| AttributeValue::I64(99));
        assert_eq!(serialize(&value).unwrap(), "99");
    }

    #[test]
    fn lazy_chains_resolve_through_multiple_levels() {
        let value =
            AttributeValue::lazy(|| AttributeValue::lazy(|| AttributeValue::String("deep".into())));
        assert_eq!(serialize(&value).unwrap(), "\"deep\"");
    }

    #[test]
    fn cyclic_lazy_chains_hit_the_recursion_limit() {
        fn endless() -> AttributeValue {
            AttributeValue::lazy(endless)
        }
        assert!(matches!(
            serialize(&endless()),
            Err(SerializeError::RecursionLimitExceeded)
        ));
    }

    #[test]
    fn non_finite_floats_are_a_hard_error() {
        assert!(matches!(
            serialize(&AttributeValue::F64(f64::NAN)),
            Err(SerializeError::NonFiniteFloat)
        ));
        assert!(matches!(
            serialize(&AttributeValue::F64(f64::INFINITY)),
            Err(SerializeError::NonFiniteFloat)
        ));
    }

    #[test]
    fn group_members_surface_nested_serialization_failures() {
        let group = AttributeValue::Group(vec![Attribute::new("bad", f64::NAN)]);
        assert!(serialize(&group).is_err());
    }
}
