//! Derived stream metrics and the observable status snapshot

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::{ConnectionState, Frame, QualityLabel, RunStatus};

/// Counters derived from the inbound message flow.
///
/// Counts only grow between explicit `clear` calls; reconnects leave them alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Metrics {
    /// Cumulative mean of all latency samples since the last clear
    pub average_latency_ms: Option<f64>,
    /// Number of latency samples behind the average
    pub latency_samples: u64,
    /// Data frames received
    pub total_frames_received: u64,
    /// Data frames received with the keyframe flag
    pub keyframe_count: u64,
    /// Ordinary frames evicted from the buffer plus discarded malformed messages
    pub frames_dropped: u64,
    /// Keyframes evicted because keyframes alone exceeded the buffer bound
    pub keyframes_evicted: u64,
    /// Messages that could not be decoded
    pub malformed_messages: u64,
    /// Reconnection attempts scheduled
    pub reconnect_attempts: u64,
    /// Messages of any kind received
    pub messages_received: u64,
}

/// Everything a consumer can observe about a stream at one point in time
#[derive(Debug, Clone, Default)]
pub struct StreamStatus {
    pub state: ConnectionState,
    pub quality: QualityLabel,
    /// Most recent data frame
    pub latest_frame: Option<Arc<Frame>>,
    pub metrics: Metrics,
    /// Most recent transport or decode error
    pub last_error: Option<String>,
    /// False once the producer reported a terminal status or a final frame
    pub stream_active: bool,
    pub run_status: Option<RunStatus>,
    /// Frames currently held in the buffer
    pub buffered_frames: usize,
    /// Keyframes among the buffered frames
    pub buffered_keyframes: usize,
    /// Attempt counter feeding the backoff scheduler
    pub reconnect_attempt: u32,
    /// Delay of the pending retry, if one is scheduled
    pub retry_delay: Option<Duration>,
}
