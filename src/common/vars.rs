use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// String-keyed bag of JSON values, used for resolved node parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vars {
    inner: Map<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(
        &mut self,
        key: &str,
        value: T,
    ) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.inner.insert(key.to_string(), value);
    }

    pub fn with<T: Serialize>(
        mut self,
        key: &str,
        value: T,
    ) -> Self {
        self.set(key, value);
        self
    }

    /// Typed lookup; `None` when absent or of a different shape.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Option<T> {
        self.inner.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_value(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.inner.get(key)
    }

    /// String view of a parameter; numbers and booleans are rendered.
    pub fn get_str(
        &self,
        key: &str,
    ) -> Option<String> {
        match self.inner.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.inner.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }
}

impl From<Value> for Vars {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(inner) => Self {
                inner,
            },
            _ => Self::new(),
        }
    }
}

impl From<Map<String, Value>> for Vars {
    fn from(inner: Map<String, Value>) -> Self {
        Self {
            inner,
        }
    }
}

impl From<Vars> for Value {
    fn from(vars: Vars) -> Self {
        Value::Object(vars.inner)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_typed_get() {
        let vars = Vars::new().with("count", 3).with("name", "a");
        assert_eq!(vars.get::<u64>("count"), Some(3));
        assert_eq!(vars.get::<u64>("name"), None);
        assert_eq!(vars.get_str("count"), Some("3".to_string()));
    }

    #[test]
    fn test_from_non_object_is_empty() {
        let vars = Vars::from(json!([1, 2]));
        assert_eq!(Value::from(vars), json!({}));
    }
}
