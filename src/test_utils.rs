//! Test utilities for building producer messages and scripting transports
//!
//! Shared by unit tests, the connection driver tests and the criterion
//! benches (behind the `benchmark` feature).

#![cfg(any(test, feature = "benchmark"))]

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::config::StreamUrl;
use crate::transport::{Inbound, Link, Transport};
use crate::types::{Frame, FrameKind, SequenceHint};
use crate::{Result, StreamError};

/// A data frame at `step`, built directly without going through JSON
pub fn data_frame(step: u64, keyframe: bool) -> Frame {
    Frame {
        kind: FrameKind::Frame,
        timestamp: Utc.timestamp_opt(1_700_000_000 + step as i64, 0).single().unwrap_or_default(),
        sequence: SequenceHint {
            time: Some(step as f64 * 0.1),
            timestep: Some(step),
            save_step: Some(step / 10),
        },
        is_keyframe: keyframe,
        is_final: false,
        latency_ms: None,
        payload: json!({ "data": { "voltage": -0.8, "current_density": [1.0, 2.0, 3.0] } }),
    }
}

/// Wire form of a data frame as the producer emits it
pub fn data_message(step: u64, keyframe: bool, latency_ms: Option<f64>) -> String {
    let mut message = json!({
        "type": "frame",
        "timestamp": "2025-01-15T10:30:00.123456",
        "data": {
            "time": step as f64 * 0.1,
            "timestep": step,
            "save_step": step / 10,
            "is_keyframe": keyframe,
            "final": false,
            "data": { "voltage": -0.8, "concentration": [0.1, 0.2] },
        },
    });
    if let Some(latency) = latency_ms {
        message["_latency_ms"] = json!(latency);
    }
    message.to_string()
}

/// Wire form of a final data frame
pub fn final_message(step: u64) -> String {
    json!({
        "type": "frame",
        "timestamp": "2025-01-15T10:31:00Z",
        "data": { "timestep": step, "is_keyframe": true, "final": true, "data": {} },
    })
    .to_string()
}

/// Wire form of a run status update
pub fn status_message(status: &str) -> String {
    json!({
        "type": "status",
        "timestamp": "2025-01-15T10:30:00Z",
        "data": { "status": status },
    })
    .to_string()
}

/// How the next `open` call behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Accept,
    Refuse,
    /// Accept after a delay
    Delay(Duration),
    /// Never resolve
    Hang,
}

#[derive(Default)]
struct Script {
    outcomes: VecDeque<OpenOutcome>,
    urls: Vec<String>,
}

struct MockState {
    script: Mutex<Script>,
    opens: watch::Sender<usize>,
    live: watch::Sender<usize>,
    links_tx: mpsc::UnboundedSender<MockLinkHandle>,
    links_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockLinkHandle>>,
}

impl MockState {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-process transport driven by the test.
///
/// Every accepted `open` hands a [`MockLinkHandle`] to the test through
/// [`next_link`](Self::next_link). Outcomes default to `Accept` once the
/// script runs out.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(MockState {
                script: Mutex::new(Script::default()),
                opens: watch::channel(0).0,
                live: watch::channel(0).0,
                links_tx,
                links_rx: tokio::sync::Mutex::new(links_rx),
            }),
        }
    }

    /// Queue outcomes for the next `open` calls
    pub fn script(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) -> &Self {
        self.state.script().outcomes.extend(outcomes);
        self
    }

    /// Number of `open` calls so far
    pub fn open_count(&self) -> usize {
        *self.state.opens.borrow()
    }

    /// Links opened and not yet dropped
    pub fn live_links(&self) -> usize {
        *self.state.live.borrow()
    }

    /// Raw URLs passed to `open`, token included
    pub fn urls(&self) -> Vec<String> {
        self.state.script().urls.clone()
    }

    /// Wait for the next accepted link
    pub async fn next_link(&self) -> MockLinkHandle {
        let mut links = self.state.links_rx.lock().await;
        match links.recv().await {
            Some(handle) => handle,
            None => unreachable!("mock transport owns a sender"),
        }
    }

    /// Wait until at least `count` opens have started
    pub async fn wait_for_opens(&self, count: usize) {
        let mut opens = self.state.opens.subscribe();
        let _ = opens.wait_for(|opens| *opens >= count).await;
    }

    /// Wait until exactly `count` links are live
    pub async fn wait_for_live(&self, count: usize) {
        let mut live = self.state.live.subscribe();
        let _ = live.wait_for(|live| *live == count).await;
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &StreamUrl) -> Result<Box<dyn Link>> {
        let outcome = {
            let mut script = self.state.script();
            script.urls.push(url.expose());
            script.outcomes.pop_front().unwrap_or(OpenOutcome::Accept)
        };
        self.state.opens.send_modify(|opens| *opens += 1);

        match outcome {
            OpenOutcome::Accept => {}
            OpenOutcome::Refuse => return Err(StreamError::connection_failed("connection refused")),
            OpenOutcome::Delay(delay) => tokio::time::sleep(delay).await,
            OpenOutcome::Hang => std::future::pending::<()>().await,
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(None);
        self.state.live.send_modify(|live| *live += 1);
        let _ = self.state.links_tx.send(MockLinkHandle { inbound: inbound_tx, closed: closed_rx });

        Ok(Box::new(MockLink { inbound: inbound_rx, closed: closed_tx, state: Arc::clone(&self.state) }))
    }
}

struct MockLink {
    inbound: mpsc::UnboundedReceiver<Result<Inbound>>,
    closed: watch::Sender<Option<(u16, String)>>,
    state: Arc<MockState>,
}

#[async_trait::async_trait]
impl Link for MockLink {
    async fn recv(&mut self) -> Option<Result<Inbound>> {
        self.inbound.recv().await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.closed.send_replace(Some((code, reason.to_string())));
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.state.live.send_modify(|live| *live -= 1);
    }
}

/// Test side of one mock link
pub struct MockLinkHandle {
    inbound: mpsc::UnboundedSender<Result<Inbound>>,
    closed: watch::Receiver<Option<(u16, String)>>,
}

impl MockLinkHandle {
    /// Deliver a text message
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Ok(Inbound::Text(text.into())));
    }

    /// Deliver a message the link could not decode
    pub fn send_undecodable(&self, details: &str) {
        let _ = self.inbound.send(Err(StreamError::malformed(details)));
    }

    /// Fail the link with a transport error
    pub fn fail(&self, reason: &str) {
        let _ = self.inbound.send(Err(StreamError::connection_failed(reason)));
    }

    /// Close from the producer side
    pub fn close_remote(&self, code: Option<u16>) {
        let _ = self.inbound.send(Ok(Inbound::Closed { code, reason: "server closing".to_string() }));
    }

    /// Wait for the client to close the link.
    ///
    /// `None` if the link was dropped without a close handshake.
    pub async fn client_close(&mut self) -> Option<(u16, String)> {
        let _ = self.closed.wait_for(Option::is_some).await;
        self.closed.borrow().clone()
    }
}
