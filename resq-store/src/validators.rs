//! Built-in field validators.
//!
//! A validator is any function from a raw JSON value to a parsed JSON value.
//! These cover the common cases and the two fields the store itself cares
//! about, [`identity`] and [`updated_on`].

use crate::error::ValidationError;
use crate::schema::{ConstructionContext, FieldValidator};
use chrono::{DateTime, TimeZone, Utc};
use resq_types::Identity;
use serde_json::Value;

/// Name of a JSON value's type, for error messages.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expected(what: &str, got: &Value) -> ValidationError {
    ValidationError::invalid(format!("expected {what}, got {}", type_name(got)))
}

/// Pins a closure to the validator signature.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&Value, &mut ConstructionContext) -> Result<Value, ValidationError>,
{
    f
}

/// Accepts any value, including null.
pub fn any() -> impl FieldValidator {
    from_fn(|raw, _| Ok(raw.clone()))
}

pub fn string() -> impl FieldValidator {
    from_fn(|raw, _| match raw {
        Value::String(_) => Ok(raw.clone()),
        other => Err(expected("string", other)),
    })
}

pub fn number() -> impl FieldValidator {
    from_fn(|raw, _| match raw {
        Value::Number(_) => Ok(raw.clone()),
        other => Err(expected("number", other)),
    })
}

pub fn integer() -> impl FieldValidator {
    from_fn(|raw, _| match raw {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw.clone()),
        other => Err(expected("integer", other)),
    })
}

pub fn boolean() -> impl FieldValidator {
    from_fn(|raw, _| match raw {
        Value::Bool(_) => Ok(raw.clone()),
        other => Err(expected("boolean", other)),
    })
}

/// Accepts a number, or a string that parses as one, and outputs a number.
pub fn coerce_number() -> impl FieldValidator {
    from_fn(|raw, _| match raw {
        Value::Number(_) => Ok(raw.clone()),
        Value::String(s) => {
            let parsed: f64 = s
                .trim()
                .parse()
                .map_err(|_| ValidationError::invalid(format!("`{s}` is not a number")))?;
            if parsed.fract() == 0.0 && parsed.abs() < i64::MAX as f64 {
                Ok(Value::from(parsed as i64))
            } else {
                Ok(Value::from(parsed))
            }
        }
        other => Err(expected("number or numeric string", other)),
    })
}

/// One of a fixed set of strings.
pub fn enumeration(options: &[&str]) -> impl FieldValidator + use<> {
    let options: Vec<String> = options.iter().map(|s| s.to_string()).collect();
    from_fn(move |raw, _| match raw {
        Value::String(s) if options.iter().any(|o| o == s) => Ok(raw.clone()),
        Value::String(s) => Err(ValidationError::invalid(format!(
            "`{s}` is not one of [{}]",
            options.join(", ")
        ))),
        other => Err(expected("string", other)),
    })
}

/// Null passes through as null; anything else goes to `inner`.
pub fn optional(inner: impl FieldValidator + 'static) -> impl FieldValidator {
    from_fn(move |raw, ctx| {
        if raw.is_null() {
            Ok(Value::Null)
        } else {
            inner.validate(raw, ctx)
        }
    })
}

/// An array whose every item passes `item`.
pub fn array(item: impl FieldValidator + 'static) -> impl FieldValidator {
    from_fn(move |raw, ctx| {
        let Value::Array(items) = raw else {
            return Err(expected("array", raw));
        };
        items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                item.validate(v, ctx)
                    .map_err(|e| ValidationError::invalid(format!("[{i}] {e}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    })
}

/// Marks the identity field. The parsed value (a string, or a number used as
/// its decimal string) becomes the entity's identity.
pub fn identity(inner: impl FieldValidator + 'static) -> impl FieldValidator {
    from_fn(move |raw, ctx| {
        let parsed = inner.validate(raw, ctx)?;
        let id = match &parsed {
            Value::String(s) => {
                Identity::parse(s).map_err(|e| ValidationError::invalid(e.to_string()))?
            }
            Value::Number(n) => Identity::from(n.to_string()),
            other => return Err(expected("string or number identity", other)),
        };
        ctx.capture_identity(id);
        Ok(parsed)
    })
}

/// Marks the source timestamp of a record. Accepts RFC 3339 strings or
/// milliseconds since the epoch and stores the RFC 3339 form.
pub fn updated_on() -> impl FieldValidator {
    from_fn(|raw, ctx| {
        let at: DateTime<Utc> = match raw {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| ValidationError::invalid(format!("invalid timestamp `{s}`: {e}")))?,
            Value::Number(n) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .ok_or_else(|| ValidationError::invalid(format!("invalid timestamp {n}")))?,
            other => return Err(expected("timestamp", other)),
        };
        ctx.capture_updated_on(at);
        Ok(Value::String(at.to_rfc3339()))
    })
}
