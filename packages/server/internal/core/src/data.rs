//! Boundary value container for call parameters and results
//!
//! [`FunctionData`] is either a string-keyed map (the common case, matching a
//! JSON object on the wire) or a single scalar value for results that are not
//! naturally keyed. Key order carries no meaning.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Key under which a scalar result is visible through the map API
pub const VALUE_KEY: &str = "value";

/// Parameters or result of a function call
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionData {
    /// Keyed values
    Map(Map<String, Value>),
    /// A single, unkeyed value
    Value(Value),
}

impl Default for FunctionData {
    fn default() -> Self {
        FunctionData::Map(Map::new())
    }
}

impl FunctionData {
    /// Empty keyed container
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-value container
    pub fn value(value: impl Into<Value>) -> Self {
        FunctionData::Value(value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            FunctionData::Map(map) => map.get(key),
            FunctionData::Value(value) if key == VALUE_KEY => Some(value),
            FunctionData::Value(_) => None,
        }
    }

    /// Deserialize one entry into a concrete type
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Insert a value. A single-value container becomes keyed, keeping its
    /// previous value under [`VALUE_KEY`].
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let FunctionData::Value(previous) = self {
            let mut map = Map::new();
            map.insert(VALUE_KEY.to_string(), previous.take());
            *self = FunctionData::Map(map);
        }
        if let FunctionData::Map(map) = self {
            map.insert(key.into(), value.into());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match self {
            FunctionData::Map(map) => map.remove(key),
            FunctionData::Value(_) if key == VALUE_KEY => {
                match std::mem::take(self) {
                    FunctionData::Value(value) => Some(value),
                    FunctionData::Map(_) => None,
                }
            }
            FunctionData::Value(_) => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        match self {
            FunctionData::Map(map) => map.keys().cloned().collect(),
            FunctionData::Value(_) => vec![VALUE_KEY.to_string()],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FunctionData::Map(map) => map.len(),
            FunctionData::Value(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_value(&self) -> bool {
        matches!(self, FunctionData::Value(_))
    }

    /// Copy as a keyed map
    pub fn to_map(&self) -> Map<String, Value> {
        match self {
            FunctionData::Map(map) => map.clone(),
            FunctionData::Value(value) => {
                let mut map = Map::new();
                map.insert(VALUE_KEY.to_string(), value.clone());
                map
            }
        }
    }

    /// JSON form: an object for keyed data, the raw value otherwise
    pub fn to_json(&self) -> Value {
        match self {
            FunctionData::Map(map) => Value::Object(map.clone()),
            FunctionData::Value(value) => value.clone(),
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            FunctionData::Map(map) => Value::Object(map),
            FunctionData::Value(value) => value,
        }
    }

    /// Deserialize the whole container into a concrete type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_json())
    }

    /// Serialize a value into a container
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(FunctionData::from)
    }
}

impl From<Value> for FunctionData {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => FunctionData::Map(map),
            other => FunctionData::Value(other),
        }
    }
}

impl From<Map<String, Value>> for FunctionData {
    fn from(map: Map<String, Value>) -> Self {
        FunctionData::Map(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for FunctionData {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        FunctionData::Map(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Serialize for FunctionData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FunctionData::Map(map) => map.serialize(serializer),
            FunctionData::Value(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FunctionData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(FunctionData::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_operations() {
        let mut data = FunctionData::new();
        assert!(data.is_empty());

        data.set("a", 10.0);
        data.set("b", "five");
        assert!(data.has("a"));
        assert!(!data.has("c"));
        assert_eq!(data.get_f64("a"), Some(10.0));
        assert_eq!(data.get_str("b"), Some("five"));
        assert_eq!(data.len(), 2);

        let mut keys = data.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        assert_eq!(data.remove("b"), Some(json!("five")));
        assert_eq!(data.to_map().len(), 1);
    }

    #[test]
    fn test_scalar_variant() {
        let data = FunctionData::value(15.0);
        assert!(data.is_value());
        assert_eq!(data.get_f64(VALUE_KEY), Some(15.0));
        assert_eq!(data.keys(), vec![VALUE_KEY]);
        assert_eq!(data.to_json(), json!(15.0));
        assert_eq!(data.to_map().get(VALUE_KEY), Some(&json!(15.0)));
    }

    #[test]
    fn test_set_on_scalar_promotes_to_map() {
        let mut data = FunctionData::value("first");
        data.set("second", 2);
        assert!(!data.is_value());
        assert_eq!(data.get_str(VALUE_KEY), Some("first"));
        assert_eq!(data.get_i64("second"), Some(2));
    }

    #[test]
    fn test_from_json() {
        let keyed = FunctionData::from(json!({"message": "hello"}));
        assert_eq!(keyed.get_str("message"), Some("hello"));

        let scalar = FunctionData::from(json!([1, 2, 3]));
        assert!(scalar.is_value());
    }

    #[test]
    fn test_serde_shape() {
        let keyed = FunctionData::new().with("echo", "hello world");
        assert_eq!(
            serde_json::to_string(&keyed).unwrap(),
            r#"{"echo":"hello world"}"#
        );

        let scalar: FunctionData = serde_json::from_str("42").unwrap();
        assert_eq!(scalar, FunctionData::value(42));
    }

    #[test]
    fn test_typed_access() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct User {
            id: u32,
            name: String,
        }

        let user = User {
            id: 7,
            name: "ada".to_string(),
        };
        let data = FunctionData::encode(&user).unwrap();
        assert_eq!(data.get_as::<u32>("id"), Some(7));
        assert_eq!(data.decode::<User>().unwrap(), user);
    }
}
