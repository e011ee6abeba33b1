//! Wire envelope decoding
//!
//! Every inbound message is a JSON object:
//!
//! ```json
//! {
//!   "type": "frame",
//!   "timestamp": "2024-11-22T01:22:00.123456",
//!   "data": { "timestep": 10, "is_keyframe": true, "data": { "voltage": -0.8 } },
//!   "_latency_ms": 12.5
//! }
//! ```
//!
//! Kind-specific fields are read from `data` first and then from the envelope
//! itself, because producers also emit frame fields at the top level.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::{Frame, FrameKind, SequenceHint};
use crate::{Result, StreamError};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: FrameKind,
    timestamp: Option<Value>,
    #[serde(default)]
    data: Value,
    #[serde(rename = "_latency_ms", default)]
    latency_ms: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl Envelope {
    fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name).or_else(|| self.rest.get(name))
    }

    fn flag(&self, name: &str) -> bool {
        self.field(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Decode one text message into a [`Frame`].
///
/// Fails with [`StreamError::MalformedMessage`] when the text is not a JSON
/// object, the `type` is unknown, or the timestamp is missing or unparseable.
pub fn parse_message(text: &str) -> Result<Frame> {
    let envelope: Envelope = serde_json::from_str(text)?;

    let timestamp = match envelope.timestamp.as_ref() {
        Some(Value::String(raw)) => parse_timestamp(raw)?,
        Some(other) => {
            return Err(StreamError::malformed(format!("timestamp is not a string: {other}")));
        }
        None => return Err(StreamError::malformed("missing timestamp")),
    };

    let sequence = SequenceHint {
        time: envelope.field("time").and_then(Value::as_f64),
        timestep: envelope.field("timestep").and_then(Value::as_u64),
        save_step: envelope.field("save_step").and_then(Value::as_u64),
    };

    let latency_ms = envelope
        .latency_ms
        .as_ref()
        .and_then(Value::as_f64)
        .filter(|ms| ms.is_finite() && *ms >= 0.0);

    let is_keyframe = envelope.flag("is_keyframe");
    let is_final = envelope.flag("final");

    let payload = match envelope.data {
        Value::Null => Value::Object(envelope.rest),
        data => data,
    };

    Ok(Frame {
        kind: envelope.kind,
        timestamp,
        sequence,
        is_keyframe,
        is_final,
        latency_ms,
        payload,
    })
}

/// Parse an ISO-8601 timestamp, reading offset-less values as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| naive.and_utc())
        .map_err(|e| StreamError::malformed(format!("invalid timestamp '{raw}': {e}")))
}
