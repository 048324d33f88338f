use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A JSON-RPC payload value.
///
/// Printers answer with loosely shaped objects; callers pull out what they
/// need through the accessors or decode into a typed struct with
/// [`RpcValue::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Array(Vec<RpcValue>),
    Object(BTreeMap<String, RpcValue>),
}

impl RpcValue {
    /// Build an object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, RpcValue)>,
    {
        RpcValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RpcValue::Null)
    }

    pub fn get(&self, key: &str) -> Option<&RpcValue> {
        match self {
            RpcValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RpcValue::Integer(i) => Some(*i),
            RpcValue::Double(d) if d.fract() == 0.0 => Some(*d as i64),
            _ => None,
        }
    }

    /// Integers widen to doubles.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RpcValue::Integer(i) => Some(*i as f64),
            RpcValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RpcValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RpcValue]> {
        match self {
            RpcValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, RpcValue>> {
        match self {
            RpcValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Decode into a typed struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::Value::from(self.clone()))
    }
}

impl From<serde_json::Value> for RpcValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RpcValue::Null,
            serde_json::Value::Bool(b) => RpcValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => RpcValue::Integer(i),
                None => RpcValue::Double(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => RpcValue::String(s),
            serde_json::Value::Array(items) => {
                RpcValue::Array(items.into_iter().map(RpcValue::from).collect())
            }
            serde_json::Value::Object(map) => RpcValue::Object(
                map.into_iter().map(|(k, v)| (k, RpcValue::from(v))).collect(),
            ),
        }
    }
}

impl From<RpcValue> for serde_json::Value {
    fn from(value: RpcValue) -> Self {
        match value {
            RpcValue::Null => serde_json::Value::Null,
            RpcValue::Bool(b) => serde_json::Value::Bool(b),
            RpcValue::Integer(i) => serde_json::Value::from(i),
            RpcValue::Double(d) => serde_json::Number::from_f64(d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            RpcValue::String(s) => serde_json::Value::String(s),
            RpcValue::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            RpcValue::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for RpcValue {
    fn from(value: &str) -> Self {
        RpcValue::String(value.to_string())
    }
}

impl From<String> for RpcValue {
    fn from(value: String) -> Self {
        RpcValue::String(value)
    }
}

impl From<i64> for RpcValue {
    fn from(value: i64) -> Self {
        RpcValue::Integer(value)
    }
}

impl From<f64> for RpcValue {
    fn from(value: f64) -> Self {
        RpcValue::Double(value)
    }
}

impl From<bool> for RpcValue {
    fn from(value: bool) -> Self {
        RpcValue::Bool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_keep_their_kind() {
        let value = RpcValue::from(json!({"a": 1, "b": 1.5, "c": -3}));
        assert_eq!(value.get("a"), Some(&RpcValue::Integer(1)));
        assert_eq!(value.get("b"), Some(&RpcValue::Double(1.5)));
        assert_eq!(value.get("c").and_then(RpcValue::as_i64), Some(-3));
        assert_eq!(value.get("a").and_then(RpcValue::as_f64), Some(1.0));
        assert_eq!(value.get("b").and_then(RpcValue::as_i64), None);
    }

    #[test]
    fn test_deserialize_untagged() {
        let value: RpcValue =
            serde_json::from_str(r#"{"name":"bot","on":true,"temps":[20,21.5],"x":null}"#).unwrap();
        assert_eq!(value.get("name").and_then(RpcValue::as_str), Some("bot"));
        assert_eq!(value.get("on").and_then(RpcValue::as_bool), Some(true));
        assert_eq!(value.get("temps").and_then(RpcValue::as_array).map(|a| a.len()), Some(2));
        assert!(value.get("x").unwrap().is_null());
        assert!(value.get("missing").is_none());
    }

    #[test]
    fn test_decode_into_struct() {
        #[derive(Deserialize)]
        struct Version {
            major: u32,
            minor: u32,
        }

        let value = RpcValue::object([("major", RpcValue::from(2i64)), ("minor", RpcValue::from(7i64))]);
        let version: Version = value.decode().unwrap();
        assert_eq!((version.major, version.minor), (2, 7));
    }
}
