//! Frame types received from the producer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminant of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum FrameKind {
    /// Simulation or instrument data
    Frame,
    /// Run lifecycle update
    Status,
    /// Producer log line
    Log,
    /// System event (connected, error, ...)
    Event,
}

/// Display-only position of a frame within the producer's run.
///
/// Never used for buffer ordering; the buffer keeps arrival order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct SequenceHint {
    /// Simulated time
    pub time: Option<f64>,
    /// Solver timestep index
    pub timestep: Option<u64>,
    /// Save step index
    pub save_step: Option<u64>,
}

/// Run lifecycle status carried by `status` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Whether the producer will send nothing more for this run
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// An immutable message received over the transport.
///
/// Frames are shared as `Arc<Frame>` between the buffer, the latest-frame slot
/// and consumer snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    /// Message discriminant
    pub kind: FrameKind,

    /// Time the producer generated the message
    pub timestamp: DateTime<Utc>,

    /// Display-only sequence information
    pub sequence: SequenceHint,

    /// Producer marked this frame as required for state reconstruction
    pub is_keyframe: bool,

    /// Producer will send no further frames for this stream
    pub is_final: bool,

    /// Latency sample attached by the transport layer
    pub latency_ms: Option<f64>,

    /// Kind-specific payload, opaque to the streaming core
    pub payload: Value,
}

impl Frame {
    /// Run status for `status` messages
    pub fn run_status(&self) -> Option<RunStatus> {
        if self.kind != FrameKind::Status {
            return None;
        }
        self.payload.get("status").cloned().and_then(|v| serde_json::from_value(v).ok())
    }

    /// Physical quantities carried by a data frame
    pub fn quantities(&self) -> Option<&Value> {
        self.payload.get("data")
    }

    /// Event name for `event` messages
    pub fn event_name(&self) -> Option<&str> {
        match self.kind {
            FrameKind::Event => self.payload.get("event").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Human-readable message for `log` and `event` messages
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }
}
