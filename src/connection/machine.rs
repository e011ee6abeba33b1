//! Connection state machine
//!
//! [`StreamMachine`] owns every piece of per-stream state: lifecycle, backoff
//! attempt counter, frame buffer, quality classifier and metrics. It never
//! touches a socket or a timer. Inputs are method calls and tagged
//! [`TransportEvent`]s; outputs are [`Action`]s for the driver to carry out.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected (stopped)
//!                     ^             |
//!                     |             v
//!                     +------ Reconnecting (backoff timer)
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::Backoff;
use crate::buffer::{Evicted, FrameBuffer};
use crate::protocol;
use crate::quality::QualityClassifier;
use crate::transport::NORMAL_CLOSURE;
use crate::types::{
    ConnectionState, Frame, FrameKind, Metrics, QualityLabel, RunStatus, StreamStatus,
};

/// Close reason for an explicit consumer disconnect
pub const CLIENT_DISCONNECT: &str = "client disconnect";

/// Close reason for teardown when the client goes away
pub const COMPONENT_UNMOUNT: &str = "component unmount";

/// Event reported by the link belonging to one connection generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    /// A message the link could not decode; the link stays usable
    Malformed(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

/// Side effect requested by the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a new link tagged with `generation`
    Open { generation: u64 },
    /// Close the current link
    Close { code: u16, reason: &'static str },
    /// Arm the backoff timer
    ScheduleRetry { delay: Duration, attempt: u32 },
    /// Disarm the backoff timer
    CancelRetry,
}

/// Per-stream state machine
#[derive(Debug)]
pub struct StreamMachine {
    state: ConnectionState,
    quality: QualityLabel,
    classifier: QualityClassifier,
    buffer: FrameBuffer,
    metrics: Metrics,
    backoff: Backoff,
    attempt: u32,
    reconnect: bool,
    stopped: bool,
    generation: u64,
    latest_frame: Option<Arc<Frame>>,
    last_error: Option<String>,
    stream_active: bool,
    run_status: Option<RunStatus>,
    retry_delay: Option<Duration>,
}

impl StreamMachine {
    pub fn new(max_frames: usize, backoff: Backoff, reconnect: bool) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            quality: QualityLabel::Disconnected,
            classifier: QualityClassifier::new(),
            buffer: FrameBuffer::new(max_frames),
            metrics: Metrics::default(),
            backoff,
            attempt: 0,
            reconnect,
            stopped: false,
            generation: 0,
            latest_frame: None,
            last_error: None,
            stream_active: false,
            run_status: None,
            retry_delay: None,
        }
    }

    /// Explicit consumer connect.
    ///
    /// A no-op while a link is open or opening. Clears the do-not-reconnect
    /// flag and, when a retry is pending, connects right away instead.
    pub fn connect(&mut self) -> Vec<Action> {
        if self.state.has_transport() {
            debug!(state = %self.state, "Connect ignored, transport already live");
            return Vec::new();
        }
        self.stopped = false;
        let mut actions = Vec::with_capacity(2);
        if self.retry_delay.take().is_some() {
            actions.push(Action::CancelRetry);
        }
        actions.push(self.begin_attempt());
        actions
    }

    /// The backoff timer fired
    pub fn retry_elapsed(&mut self) -> Vec<Action> {
        self.retry_delay = None;
        if self.stopped || self.state != ConnectionState::Reconnecting {
            trace!(state = %self.state, stopped = self.stopped, "Stale retry timer ignored");
            return Vec::new();
        }
        vec![self.begin_attempt()]
    }

    fn begin_attempt(&mut self) -> Action {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        info!(generation = self.generation, attempt = self.attempt, "Connecting");
        Action::Open { generation: self.generation }
    }

    /// Explicit consumer disconnect, also used for teardown.
    ///
    /// Sets the do-not-reconnect flag, cancels any pending retry, closes the
    /// link and invalidates events from any in-flight attempt.
    pub fn disconnect(&mut self, reason: &'static str) -> Vec<Action> {
        info!(state = %self.state, reason, "Disconnecting");
        self.stopped = true;
        self.retry_delay = None;
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
        self.quality = QualityLabel::Disconnected;
        vec![Action::CancelRetry, Action::Close { code: NORMAL_CLOSURE, reason }]
    }

    /// Route an event from the link of `generation`
    pub fn handle(&mut self, generation: u64, event: TransportEvent) -> Vec<Action> {
        if generation != self.generation {
            trace!(generation, current = self.generation, ?event, "Dropping stale transport event");
            return Vec::new();
        }

        match event {
            TransportEvent::Opened => {
                self.on_open();
                Vec::new()
            }
            TransportEvent::Message(text) => {
                self.on_message(&text);
                Vec::new()
            }
            TransportEvent::Malformed(error) => {
                self.metrics.messages_received += 1;
                self.discard_malformed(error);
                Vec::new()
            }
            TransportEvent::Error(message) => {
                // The close that follows owns the retry
                error!(generation, error = %message, "Transport error");
                self.quality = QualityLabel::Disconnected;
                self.last_error = Some(message);
                Vec::new()
            }
            TransportEvent::Closed { code, reason } => self.on_close(code, reason),
        }
    }

    fn on_open(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempt = 0;
        self.last_error = None;
        self.stream_active = true;
        self.quality = self.classifier.label();
        info!(generation = self.generation, quality = %self.quality, "Connected");
    }

    fn discard_malformed(&mut self, error: String) {
        warn!(%error, "Discarding malformed message");
        self.metrics.malformed_messages += 1;
        self.metrics.frames_dropped += 1;
        self.last_error = Some(error);
    }

    fn on_message(&mut self, text: &str) {
        self.metrics.messages_received += 1;

        let frame = match protocol::parse_message(text) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                trace!(bytes = text.len(), "Undecodable message");
                self.discard_malformed(e.to_string());
                return;
            }
        };

        if let Some(sample) = frame.latency_ms {
            self.classifier.record(sample);
            self.metrics.average_latency_ms = self.classifier.average_ms();
            self.metrics.latency_samples = self.classifier.samples();
            if self.state == ConnectionState::Connected {
                self.quality = self.classifier.label();
            }
        }

        match frame.kind {
            FrameKind::Frame => self.on_frame(frame),
            FrameKind::Status => {
                let status = frame.run_status();
                debug!(?status, "Run status update");
                if let Some(status) = status {
                    self.run_status = Some(status);
                    if status.is_terminal() {
                        info!(?status, "Producer reported terminal status");
                        self.stream_active = false;
                    }
                }
            }
            FrameKind::Log => log_producer_line(&frame),
            FrameKind::Event => {
                let name = frame.event_name().unwrap_or("unknown");
                debug!(event = name, message = frame.message().unwrap_or(""), "Producer event");
                if name == "error" {
                    self.last_error =
                        Some(frame.message().unwrap_or("producer reported an error").to_string());
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Arc<Frame>) {
        self.metrics.total_frames_received += 1;
        if frame.is_keyframe {
            self.metrics.keyframe_count += 1;
        }
        if frame.is_final {
            info!(timestep = ?frame.sequence.timestep, "Final frame received");
            self.stream_active = false;
        }
        trace!(
            timestep = ?frame.sequence.timestep,
            keyframe = frame.is_keyframe,
            buffered = self.buffer.len(),
            "Frame received"
        );

        self.latest_frame = Some(Arc::clone(&frame));
        let evicted = self.buffer.push(frame);
        self.record_eviction(evicted);
    }

    fn record_eviction(&mut self, evicted: Evicted) {
        if evicted.is_empty() {
            return;
        }
        self.metrics.frames_dropped += evicted.ordinary as u64;
        self.metrics.keyframes_evicted += evicted.keyframes as u64;
        if evicted.keyframes > 0 {
            warn!(
                keyframes = evicted.keyframes,
                capacity = self.buffer.capacity(),
                "Keyframes alone exceed the buffer bound, evicting oldest"
            );
        }
    }

    fn on_close(&mut self, code: Option<u16>, reason: String) -> Vec<Action> {
        info!(generation = self.generation, ?code, %reason, "Transport closed");
        self.state = ConnectionState::Disconnected;
        self.quality = QualityLabel::Disconnected;

        if !self.reconnect || self.stopped {
            return Vec::new();
        }

        let attempt = self.attempt;
        let delay = self.backoff.delay(attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.metrics.reconnect_attempts += 1;
        self.state = ConnectionState::Reconnecting;
        self.retry_delay = Some(delay);
        warn!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        vec![Action::ScheduleRetry { delay, attempt }]
    }

    /// Drop buffered frames and reset metrics and the latency average
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.classifier.reset();
        self.metrics = Metrics::default();
        self.latest_frame = None;
        if self.state == ConnectionState::Connected {
            self.quality = self.classifier.label();
        }
        debug!("Buffer and metrics cleared");
    }

    /// Change the buffer bound, evicting immediately if it shrank
    pub fn set_max_frames(&mut self, max_frames: usize) {
        let evicted = self.buffer.set_capacity(max_frames);
        debug!(max_frames = self.buffer.capacity(), ?evicted, "Buffer bound changed");
        self.record_eviction(evicted);
    }

    pub fn snapshot(&self) -> Vec<Arc<Frame>> {
        self.buffer.snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn quality(&self) -> QualityLabel {
        self.quality
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            quality: self.quality,
            latest_frame: self.latest_frame.clone(),
            metrics: self.metrics.clone(),
            last_error: self.last_error.clone(),
            stream_active: self.stream_active,
            run_status: self.run_status,
            buffered_frames: self.buffer.len(),
            buffered_keyframes: self.buffer.keyframe_len(),
            reconnect_attempt: self.attempt,
            retry_delay: self.retry_delay,
        }
    }
}

fn log_producer_line(frame: &Frame) {
    let message = frame.message().unwrap_or("");
    match frame.payload.get("level").and_then(|v| v.as_str()).unwrap_or("info") {
        "error" | "critical" => error!(target: "framestream::producer", "{message}"),
        "warning" | "warn" => warn!(target: "framestream::producer", "{message}"),
        "debug" => debug!(target: "framestream::producer", "{message}"),
        _ => info!(target: "framestream::producer", "{message}"),
    }
}
