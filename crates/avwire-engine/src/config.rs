use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::lifecycle::DEFAULT_MAX_HANDSHAKE_FAILURES;
use crate::store::DEFAULT_EVENT_CAPACITY;

/// Keys whose values never show up in debug output.
const SECRET_MARKERS: [&str; 4] = ["password", "secret", "token", "pin"];

/// Session behaviour. Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Status poll period while connected. `None` disables polling.
    #[serde(with = "duration_ms::option")]
    pub poll_interval: Option<Duration>,
    /// Period of the reconciliation loop.
    #[serde(with = "duration_ms")]
    pub reconcile_interval: Duration,
    /// Drop queued commands when the link goes down.
    pub clear_queue_on_disconnect: bool,
    /// Failed handshakes tolerated before the transport is dropped.
    pub max_handshake_failures: u32,
    /// Capacity of the status broadcast channel.
    pub event_capacity: usize,
    /// Bound on session request round trips from a [`crate::SessionHandle`].
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Some(Duration::from_secs(30)),
            reconcile_interval: Duration::from_secs(1),
            clear_queue_on_disconnect: true,
            max_handshake_failures: DEFAULT_MAX_HANDSHAKE_FAILURES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval.is_zero() {
            return Err(EngineError::InvalidConfig(
                "reconcile interval must be non-zero".to_string(),
            ));
        }
        if self.poll_interval.is_some_and(|p| p.is_zero()) {
            return Err(EngineError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "event capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read-only device settings (id, credentials, per-model tables).
///
/// Replaced wholesale on update; handshake and poll builders read it when
/// they run.
#[derive(Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    values: Map<String, Value>,
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(EngineError::InvalidConfig(format!(
                "config snapshot must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Typed view of a nested value, e.g. a per-model table.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(EngineError::from)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ConfigSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (key, value) in &self.values {
            let lower = key.to_ascii_lowercase();
            if SECRET_MARKERS.iter().any(|marker| lower.contains(marker)) {
                dbg.entry(key, &format_args!("<redacted>"));
            } else {
                dbg.entry(key, value);
            }
        }
        dbg.finish()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}
