use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Structured status attribute key: a name plus an optional zone/group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusKey {
    pub attribute: &'static str,
    pub index: Option<u32>,
}

impl StatusKey {
    pub const fn new(attribute: &'static str) -> Self {
        Self {
            attribute,
            index: None,
        }
    }

    pub const fn indexed(attribute: &'static str, index: u32) -> Self {
        Self {
            attribute,
            index: Some(index),
        }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{index}]", self.attribute),
            None => f.write_str(self.attribute),
        }
    }
}

impl Serialize for StatusKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Value of a status attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl StatusValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StatusValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StatusValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StatusValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Bool(v) => write!(f, "{v}"),
            StatusValue::Int(v) => write!(f, "{v}"),
            StatusValue::Float(v) => write!(f, "{v}"),
            StatusValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for StatusValue {
    fn from(v: bool) -> Self {
        StatusValue::Bool(v)
    }
}

impl From<i64> for StatusValue {
    fn from(v: i64) -> Self {
        StatusValue::Int(v)
    }
}

impl From<u32> for StatusValue {
    fn from(v: u32) -> Self {
        StatusValue::Int(i64::from(v))
    }
}

impl From<f64> for StatusValue {
    fn from(v: f64) -> Self {
        StatusValue::Float(v)
    }
}

impl From<&str> for StatusValue {
    fn from(v: &str) -> Self {
        StatusValue::Text(v.to_string())
    }
}

impl From<String> for StatusValue {
    fn from(v: String) -> Self {
        StatusValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_includes_index() {
        assert_eq!(StatusKey::new("power").to_string(), "power");
        assert_eq!(StatusKey::indexed("group_on", 5).to_string(), "group_on[5]");
    }

    #[test]
    fn keys_order_by_attribute_then_index() {
        let mut keys = vec![
            StatusKey::indexed("group_on", 7),
            StatusKey::new("power"),
            StatusKey::indexed("group_on", 2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                StatusKey::indexed("group_on", 2),
                StatusKey::indexed("group_on", 7),
                StatusKey::new("power"),
            ]
        );
    }

    #[test]
    fn values_serialize_untagged() {
        assert_eq!(serde_json::to_string(&StatusValue::Bool(true)).unwrap(), "true");
        assert_eq!(
            serde_json::to_string(&StatusValue::from("hdmi1")).unwrap(),
            "\"hdmi1\""
        );
        let parsed: StatusValue = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, StatusValue::Int(3));
    }
}
