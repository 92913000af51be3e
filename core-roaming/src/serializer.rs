//! Value encoding for cached settings.
//!
//! Scalars (strings, numbers, booleans, null) are stored as-is. Arrays and
//! objects are turned into a string payload by an [`ObjectSerializer`] so the
//! remote only ever holds flat key/value pairs.

use crate::error::{Result, RoamingError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Converts complex values to and from a string payload.
pub trait ObjectSerializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<String>;

    fn deserialize(&self, payload: &str) -> Result<Value>;
}

/// Compact JSON payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonObjectSerializer;

impl ObjectSerializer for JsonObjectSerializer {
    fn serialize(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, payload: &str) -> Result<Value> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Encode `value` for the cache.
pub fn encode<T: Serialize + ?Sized>(serializer: &dyn ObjectSerializer, value: &T) -> Result<Value> {
    let value = serde_json::to_value(value)?;
    match value {
        Value::Array(_) | Value::Object(_) => Ok(Value::String(serializer.serialize(&value)?)),
        scalar => Ok(scalar),
    }
}

/// Decode a cached value into `T`.
///
/// A direct conversion is tried first; string payloads are then run through
/// the serializer.
pub fn decode<T: DeserializeOwned>(serializer: &dyn ObjectSerializer, value: &Value) -> Result<T> {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(decoded) => Ok(decoded),
        Err(direct) => match value {
            Value::String(payload) => {
                let inner = serializer.deserialize(payload)?;
                serde_json::from_value(inner).map_err(RoamingError::from)
            }
            _ => Err(direct.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Layout {
        columns: u32,
        pinned: Vec<String>,
    }

    #[test]
    fn test_scalars_bypass_serializer() {
        let serializer = JsonObjectSerializer;
        assert_eq!(encode(&serializer, "dark").unwrap(), json!("dark"));
        assert_eq!(encode(&serializer, &42).unwrap(), json!(42));
        assert_eq!(encode(&serializer, &true).unwrap(), json!(true));
    }

    #[test]
    fn test_complex_values_become_payloads() {
        let serializer = JsonObjectSerializer;
        let layout = Layout {
            columns: 3,
            pinned: vec!["mail".into()],
        };

        let encoded = encode(&serializer, &layout).unwrap();
        assert_eq!(encoded, json!(r#"{"columns":3,"pinned":["mail"]}"#));

        let decoded: Layout = decode(&serializer, &encoded).unwrap();
        assert_eq!(decoded, layout);
    }

    #[test]
    fn test_string_values_stay_strings() {
        let serializer = JsonObjectSerializer;
        let encoded = encode(&serializer, r#"{"not":"parsed"}"#).unwrap();
        let decoded: String = decode(&serializer, &encoded).unwrap();
        assert_eq!(decoded, r#"{"not":"parsed"}"#);
    }

    #[test]
    fn test_decode_type_mismatch() {
        let serializer = JsonObjectSerializer;
        let result: Result<u32> = decode(&serializer, &json!(true));
        assert!(matches!(result, Err(RoamingError::Serialization(_))));
    }
}
