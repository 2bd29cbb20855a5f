//! Inbound EdgeX event envelope and reading value conversion.
//!
//! Messages arrive as `{"payload":{"event":{...}}}`. Only the fields needed
//! for routing are typed; everything else on a reading is carried through to
//! the delivered output untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Top-level bus message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default, deserialize_with = "lenient")]
    pub payload: Option<EnvelopePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvelopePayload {
    #[serde(default, deserialize_with = "lenient")]
    pub event: Option<InboundEvent>,
}

impl Envelope {
    /// Parse a raw bus payload.
    ///
    /// Fails only when the bytes are not JSON. Fields of an unexpected shape
    /// fall back to their defaults, so such a message carries no event.
    pub fn from_slice(payload: &[u8]) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(payload)?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    /// The event, when the message carries one with a readings list.
    pub fn into_event(self) -> Option<InboundEvent> {
        self.payload?
            .event
            .filter(|event| event.readings.is_some())
    }
}

/// Device-scoped telemetry event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(default, deserialize_with = "lenient")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub source_name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub readings: Option<Vec<Reading>>,
}

impl InboundEvent {
    /// Readings of the event, empty when absent.
    pub fn readings(&self) -> &[Reading] {
        self.readings.as_deref().unwrap_or_default()
    }

    /// Convert every reading value according to its declared type.
    pub fn convert_readings(&mut self) {
        if let Some(readings) = self.readings.as_mut() {
            for reading in readings {
                reading.value = convert_value_by_type(&reading.value, &reading.value_type);
            }
        }
    }
}

/// One scalar measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[serde(default)]
    pub value: Value,
    #[serde(default, deserialize_with = "lenient")]
    pub value_type: String,
    /// Every other reading field (resourceName, origin, units, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What a subscriber receives in one output slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMessage {
    #[serde(flatten)]
    pub reading: Reading,
    #[serde(rename = "eventid")]
    pub event_id: String,
    pub source_name: String,
}

impl OutputMessage {
    /// Wrap a (converted) reading with its event context.
    pub fn new(reading: Reading, event: &InboundEvent) -> Self {
        Self {
            reading,
            event_id: event.id.clone(),
            source_name: event.source_name.clone(),
        }
    }
}

/// Accept any JSON for a field and keep the default when it does not fit `T`.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Convert a reading value according to its EdgeX value type.
///
/// Integer types parse the leading base-10 integer of the text, float types
/// the leading decimal number; text with no number becomes `null`. Boolean
/// types are `true` only for a native `true` or the string `"true"`. String
/// and unknown types are returned unchanged.
pub fn convert_value_by_type(value: &Value, value_type: &str) -> Value {
    match value_type {
        "Int8" | "Int16" | "Int32" | "Int64" | "Uint8" | "Uint16" | "Uint32" | "Uint64" => {
            parse_integer(value)
        }
        "Float32" | "Float64" => parse_float(value),
        "Bool" | "Boolean" => {
            Value::Bool(matches!(value, Value::Bool(true)) || value.as_str() == Some("true"))
        }
        _ => value.clone(),
    }
}

fn parse_integer(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Value::Number(n.clone()),
        Value::Number(n) => n
            .as_f64()
            .map(f64::trunc)
            .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map_or(Value::Null, |f| Value::from(f as i64)),
        Value::String(s) => integer_prefix(s).map_or(Value::Null, |n| {
            i64::try_from(n)
                .map(Value::from)
                .or_else(|_| u64::try_from(n).map(Value::from))
                .unwrap_or(Value::Null)
        }),
        _ => Value::Null,
    }
}

fn integer_prefix(text: &str) -> Option<i128> {
    let text = text.trim_start();
    let (sign, digits) = match text.as_bytes().first() {
        Some(b'-') => (-1, &text[1..]),
        Some(b'+') => (1, &text[1..]),
        _ => (1, text),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i128>().ok().map(|n| sign * n)
}

fn parse_float(value: &Value) -> Value {
    match value {
        Value::Number(n) => n.as_f64().map_or(Value::Null, Value::from),
        Value::String(s) => float_prefix(s).map_or(Value::Null, Value::from),
        _ => Value::Null,
    }
}

fn float_prefix(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(f) = text.parse::<f64>() {
        return Some(f);
    }
    // Longest leading run that still parses, e.g. "3.14V" -> 3.14.
    let candidate_len = text
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E')))
        .unwrap_or(text.len());
    (1..=candidate_len)
        .rev()
        .find_map(|end| text[..end].parse::<f64>().ok())
}
