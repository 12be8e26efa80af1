//! Definition of the messages published on the event bus

use serde_json::{Map, Number, Value};

/// Event published to history or state topics.
///
/// Serialises as `{"key": ..., "data": ...}`, with `type` and any extra
/// fields (e.g. `colour`, `timestamp`) alongside when present.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Event {
    /// Identifies the publishing service or device
    pub key: String,

    /// Event type for state events, e.g. `Spark.state`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Payload
    #[serde(default)]
    pub data: Value,

    /// Additional top-level fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    /// Event with only a key and data - the history shape
    pub fn new(key: &str, data: Value) -> Self {
        Self {
            key: key.to_string(),
            data,
            ..Default::default()
        }
    }

    /// Set the event type
    pub fn with_type(mut self, event_type: &str) -> Self {
        self.event_type = Some(event_type.to_string());
        self
    }

    /// Add an extra top-level field
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }
}

/// A single measured value with its unit
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub field: String,
    pub value: f64,
    pub unit: String,
}

impl Measurement {
    pub fn new(field: &str, value: f64, unit: &str) -> Self {
        Self {
            field: field.to_string(),
            value,
            unit: unit.to_string(),
        }
    }

    /// History key: `<field>[<unit>]`
    pub fn key(&self) -> String {
        format!("{}[{}]", self.field, self.unit)
    }

    /// Mapping used as history event data. Values JSON can't carry become null.
    pub fn to_data(&self) -> Value {
        let value = Number::from_f64(self.value)
            .map(Value::Number)
            .unwrap_or(Value::Null);

        let mut data = Map::new();
        data.insert(self.key(), value);
        Value::Object(data)
    }
}
