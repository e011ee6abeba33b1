//! Consumer-facing client for one logical stream

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{CredentialProvider, Endpoint, StreamConfig};
use crate::connection::{CLIENT_DISCONNECT, StreamMachine};
use crate::connection::driver::{Command, Driver, DriverContext};
use crate::stream::ThrottleExt;
use crate::transport::Transport;
use crate::transports::WebSocketTransport;
use crate::types::{ConnectionState, Frame, Metrics, QualityLabel, StreamStatus, UpdateRate};
use crate::{Result, StreamError};

/// Handle to a streaming connection.
///
/// The connection itself runs on a background task that owns all state.
/// Commands are fire-and-forget; reads return the most recently published
/// [`StreamStatus`]. Dropping the client tears the connection down with a
/// normal closure.
///
/// ```rust,no_run
/// use framestream::{StreamClient, StreamConfig, UpdateRate};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> framestream::Result<()> {
/// let config = StreamConfig::new("ws://localhost:8080", "run_123");
/// let client = StreamClient::new(config, "access-token")?;
/// client.connect()?;
///
/// let mut updates = client.subscribe(UpdateRate::Max(10));
/// while let Some(status) = updates.next().await {
///     println!("{} / {} ({} buffered)", status.state, status.quality, status.buffered_frames);
/// }
/// # Ok(())
/// # }
/// ```
pub struct StreamClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Arc<StreamStatus>>,
    cancel: CancellationToken,
    endpoint: Endpoint,
}

impl StreamClient {
    /// Create a client that connects over WebSocket.
    ///
    /// Nothing is dialled until [`connect`](Self::connect) is called.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid and `Runtime` when
    /// called outside a tokio runtime.
    pub fn new(config: StreamConfig, credentials: impl CredentialProvider) -> Result<Self> {
        Self::with_transport(config, credentials, WebSocketTransport::new())
    }

    /// Create a client on a custom transport
    pub fn with_transport(
        config: StreamConfig,
        credentials: impl CredentialProvider,
        transport: impl Transport,
    ) -> Result<Self> {
        config.validate()?;

        let endpoint = config.endpoint()?;
        let machine =
            StreamMachine::new(config.max_frames_buffer, config.backoff(), config.reconnect);
        let context = DriverContext {
            transport: Arc::new(transport),
            credentials: Arc::new(credentials),
            endpoint: endpoint.clone(),
            connect_timeout: config.connect_timeout(),
        };
        let channels = Driver::spawn(machine, context)?;

        debug!(%endpoint, "Stream client created");
        Ok(Self {
            commands: channels.commands,
            status: channels.status,
            cancel: channels.cancel,
            endpoint,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| StreamError::ClientClosed)
    }

    /// Start streaming. A no-op while a connection is open or opening.
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// Close the connection and stop reconnecting until the next `connect`
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect { reason: CLIENT_DISCONNECT })
    }

    /// Drop buffered frames and reset metrics
    pub fn clear(&self) -> Result<()> {
        self.send(Command::Clear)
    }

    /// Change the buffer bound; shrinking evicts immediately
    pub fn set_max_frames(&self, max_frames: usize) -> Result<()> {
        if max_frames == 0 {
            return Err(StreamError::invalid_config("max_frames_buffer must be at least 1"));
        }
        self.send(Command::SetMaxFrames(max_frames))
    }

    /// Snapshot of the buffer in arrival order
    pub async fn frames(&self) -> Result<Vec<Arc<Frame>>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        response.await.map_err(|_| StreamError::ClientClosed)
    }

    /// Most recently published status
    pub fn status(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status.borrow())
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn quality(&self) -> QualityLabel {
        self.status.borrow().quality
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.status.borrow().latest_frame.clone()
    }

    pub fn metrics(&self) -> Metrics {
        self.status.borrow().metrics.clone()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Wait until the connection reaches `state`.
    ///
    /// # Errors
    ///
    /// `Timeout` if the state is not reached in time, `ClientClosed` if the
    /// driver stopped first.
    pub async fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> Result<()> {
        let mut status = self.status.clone();
        let reached = async move {
            status.wait_for(|current| current.state == state).await.map(|_| ())
        };
        match tokio::time::timeout(timeout, reached).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(StreamError::ClientClosed),
            Err(_) => Err(StreamError::Timeout { duration: timeout }),
        }
    }

    /// Status snapshots as a stream.
    ///
    /// Yields the current status immediately, then every change. With
    /// `UpdateRate::Max(hz)` emission is throttled with latest-wins semantics,
    /// so a slow consumer never sees a backlog.
    pub fn subscribe(&self, rate: UpdateRate) -> BoxStream<'static, Arc<StreamStatus>> {
        let updates = WatchStream::new(self.status.clone());

        match rate.throttle_interval() {
            None => updates.boxed(),
            Some(interval) => updates.throttle(interval).boxed(),
        }
    }

    /// Each newly received frame, starting with the current latest one.
    ///
    /// Frames that arrive between two polls are skipped; use
    /// [`frames`](Self::frames) for the full buffered history.
    pub fn frames_stream(&self) -> impl Stream<Item = Arc<Frame>> + Send + 'static {
        let mut status = self.status.clone();
        status.mark_changed();

        stream::unfold((status, None::<Arc<Frame>>), |(mut status, mut last)| async move {
            loop {
                status.changed().await.ok()?;
                let latest = status.borrow_and_update().latest_frame.clone();
                let Some(frame) = latest else { continue };
                if last.as_ref().is_some_and(|seen| Arc::ptr_eq(seen, &frame)) {
                    continue;
                }
                last = Some(Arc::clone(&frame));
                return Some((frame, (status, last)));
            }
        })
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        debug!(endpoint = %self.endpoint, "Dropping stream client");
        self.cancel.cancel();
    }
}
