//! Typed extraction from untyped JSON. Remote processes hand back free-form
//! JSON documents (generated genesis files, request params); these helpers
//! pull fields out of them with errors that name the field and the expected
//! type instead of panicking on a bad shape.

use anyhow::{anyhow, Result};
use serde_json::Value;

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn field<'a>(data: &'a Value, name: &str) -> Result<&'a Value> {
    data.get(name)
        .ok_or_else(|| anyhow!("field `{name}` is missing"))
}

pub fn json_str<'a>(data: &'a Value, name: &str) -> Result<&'a str> {
    let value = field(data, name)?;
    value
        .as_str()
        .ok_or_else(|| anyhow!("field `{name}`: expected string, found {}", value_type(value)))
}

pub fn json_u64(data: &Value, name: &str) -> Result<u64> {
    let value = field(data, name)?;
    value
        .as_u64()
        .ok_or_else(|| anyhow!("field `{name}`: expected number, found {}", value_type(value)))
}

pub fn json_bool(data: &Value, name: &str) -> Result<bool> {
    let value = field(data, name)?;
    value
        .as_bool()
        .ok_or_else(|| anyhow!("field `{name}`: expected bool, found {}", value_type(value)))
}

pub fn json_array<'a>(data: &'a Value, name: &str) -> Result<&'a [Value]> {
    let value = field(data, name)?;
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| anyhow!("field `{name}`: expected array, found {}", value_type(value)))
}

pub fn json_object<'a>(data: &'a Value, name: &str) -> Result<&'a Value> {
    let value = field(data, name)?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(anyhow!(
            "field `{name}`: expected object, found {}",
            value_type(value)
        ))
    }
}

/// Like [`json_str`] but treats a missing field (or a null value) as `None`.
/// A present field of the wrong type is still an error.
pub fn json_str_opt<'a>(data: &'a Value, name: &str) -> Result<Option<&'a str>> {
    match data.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_str().map(Some).ok_or_else(|| {
            anyhow!("field `{name}`: expected string, found {}", value_type(value))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_typed_fields() {
        let data = json!({"name": "node0", "power": 10, "active": true, "peers": ["a"]});
        assert_eq!(json_str(&data, "name").unwrap(), "node0");
        assert_eq!(json_u64(&data, "power").unwrap(), 10);
        assert!(json_bool(&data, "active").unwrap());
        assert_eq!(json_array(&data, "peers").unwrap().len(), 1);
    }

    #[test]
    fn test_error_names_field_and_types() {
        let data = json!({"power": "10"});
        let err = json_u64(&data, "power").unwrap_err().to_string();
        assert!(err.contains("`power`"), "got: {err}");
        assert!(err.contains("expected number"), "got: {err}");
        assert!(err.contains("found string"), "got: {err}");

        let err = json_str(&data, "name").unwrap_err().to_string();
        assert!(err.contains("`name`"), "got: {err}");
        assert!(err.contains("missing"), "got: {err}");
    }

    #[test]
    fn test_optional_string() {
        let data = json!({"chain_id": "net", "nodes": 3});
        assert_eq!(json_str_opt(&data, "chain_id").unwrap(), Some("net"));
        assert_eq!(json_str_opt(&data, "absent").unwrap(), None);
        assert!(json_str_opt(&data, "nodes").is_err());
    }
}
