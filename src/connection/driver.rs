//! Driver task that runs the state machine against a live transport

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::machine::{Action, COMPONENT_UNMOUNT, StreamMachine, TransportEvent};
use crate::config::{CredentialProvider, Endpoint};
use crate::transport::{Inbound, Link, NORMAL_CLOSURE, Transport};
use crate::types::{Frame, StreamStatus};
use crate::{Result, StreamError};

/// Request from the client facade
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect { reason: &'static str },
    Clear,
    SetMaxFrames(usize),
    Snapshot(oneshot::Sender<Vec<Arc<Frame>>>),
}

/// Everything the driver needs besides the machine
pub(crate) struct DriverContext {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
}

/// Result of spawning the driver task
pub(crate) struct DriverChannels {
    /// Sender for consumer commands
    pub commands: mpsc::UnboundedSender<Command>,
    /// Receiver for status snapshots
    pub status: watch::Receiver<Arc<StreamStatus>>,
    /// Cancellation token for teardown
    pub cancel: CancellationToken,
}

/// Close request handed to a link task
#[derive(Debug)]
struct CloseRequest {
    code: u16,
    reason: &'static str,
}

/// The one link the driver currently owns
struct ActiveLink {
    generation: u64,
    close: oneshot::Sender<CloseRequest>,
    task: JoinHandle<()>,
}

/// Transport events queued between link tasks and the driver.
///
/// A full queue stalls the link task, which stops reading its socket.
const EVENT_QUEUE_CAPACITY: usize = 256;

type EventSender = mpsc::Sender<(u64, TransportEvent)>;

/// Event sender stamped with one link generation
struct LinkEvents {
    generation: u64,
    events: EventSender,
}

impl LinkEvents {
    /// Waits for queue space; false once the driver is gone
    async fn send(&self, event: TransportEvent) -> bool {
        self.events.send((self.generation, event)).await.is_ok()
    }
}

/// Driver owns the state machine and executes its actions.
///
/// All stream state lives on this one task; consumers only see published
/// snapshots, so nothing is shared mutably.
pub(crate) struct Driver;

impl Driver {
    /// Spawn the driver task on the current runtime
    pub fn spawn(machine: StreamMachine, context: DriverContext) -> Result<DriverChannels> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StreamError::Runtime { reason: e.to_string() })?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Arc::new(machine.status()));
        let cancel = CancellationToken::new();

        let cancel_task = cancel.clone();
        runtime.spawn(async move {
            Self::run(machine, context, command_rx, status_tx, cancel_task).await;
        });

        Ok(DriverChannels { commands: command_tx, status: status_rx, cancel })
    }

    async fn run(
        mut machine: StreamMachine,
        context: DriverContext,
        mut commands: mpsc::UnboundedReceiver<Command>,
        status: watch::Sender<Arc<StreamStatus>>,
        cancel: CancellationToken,
    ) {
        info!(
            endpoint = %context.endpoint,
            stream_id = context.endpoint.stream_id(),
            "Stream driver started"
        );
        let (event_tx, mut events) = mpsc::channel::<(u64, TransportEvent)>(EVENT_QUEUE_CAPACITY);
        let mut link: Option<ActiveLink> = None;

        let retry = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(retry);
        let mut retry_armed = false;

        loop {
            let actions = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stream driver cancelled");
                    break;
                }
                command = commands.recv() => match command {
                    Some(Command::Connect) => machine.connect(),
                    Some(Command::Disconnect { reason }) => machine.disconnect(reason),
                    Some(Command::Clear) => {
                        machine.clear();
                        Vec::new()
                    }
                    Some(Command::SetMaxFrames(max_frames)) => {
                        machine.set_max_frames(max_frames);
                        Vec::new()
                    }
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(machine.snapshot());
                        continue;
                    }
                    None => {
                        debug!("All client handles dropped");
                        break;
                    }
                },
                Some((generation, event)) = events.recv() => {
                    let finished = matches!(event, TransportEvent::Closed { .. })
                        && link.as_ref().is_some_and(|active| active.generation == generation);
                    if finished {
                        link = None;
                    }
                    machine.handle(generation, event)
                }
                () = &mut retry, if retry_armed => {
                    retry_armed = false;
                    machine.retry_elapsed()
                }
            };

            for action in actions {
                match action {
                    Action::Open { generation } => {
                        if let Some(previous) = link.take() {
                            warn!(generation = previous.generation, "Replacing live link");
                            close_link(previous, NORMAL_CLOSURE, "superseded");
                        }
                        link = Some(open_link(&context, generation, event_tx.clone()));
                    }
                    Action::Close { code, reason } => {
                        if let Some(active) = link.take() {
                            close_link(active, code, reason);
                        }
                    }
                    Action::ScheduleRetry { delay, attempt } => {
                        debug!(attempt, ?delay, "Arming retry timer");
                        retry.as_mut().reset(Instant::now() + delay);
                        retry_armed = true;
                    }
                    Action::CancelRetry => {
                        if retry_armed {
                            debug!("Retry timer cancelled");
                        }
                        retry_armed = false;
                    }
                }
            }

            status.send_replace(Arc::new(machine.status()));
        }

        // Teardown is a disconnect that nobody can undo
        for action in machine.disconnect(COMPONENT_UNMOUNT) {
            if let Action::Close { code, reason } = action {
                if let Some(active) = link.take() {
                    close_link(active, code, reason);
                }
            }
        }
        status.send_replace(Arc::new(machine.status()));
        info!(endpoint = %context.endpoint, "Stream driver ended");
    }
}

fn open_link(context: &DriverContext, generation: u64, events: EventSender) -> ActiveLink {
    let (close_tx, close_rx) = oneshot::channel();
    let transport = Arc::clone(&context.transport);
    let credentials = Arc::clone(&context.credentials);
    let endpoint = context.endpoint.clone();
    let timeout = context.connect_timeout;

    let task = tokio::spawn(async move {
        run_link(transport, credentials, endpoint, timeout, generation, events, close_rx).await;
    });

    ActiveLink { generation, close: close_tx, task }
}

fn close_link(active: ActiveLink, code: u16, reason: &'static str) {
    debug!(generation = active.generation, code, reason, "Closing link");
    if active.close.send(CloseRequest { code, reason }).is_err() && !active.task.is_finished() {
        active.task.abort();
    }
}

async fn open_with_timeout(
    transport: &dyn Transport,
    credentials: &dyn CredentialProvider,
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<Box<dyn Link>> {
    let token = credentials.access_token()?;
    let url = endpoint.with_token(&token);
    debug!(%url, "Opening link");
    match tokio::time::timeout(timeout, transport.open(&url)).await {
        Ok(result) => result,
        Err(_) => Err(StreamError::Timeout { duration: timeout }),
    }
}

async fn close_on_request(
    link: &mut dyn Link,
    generation: u64,
    request: std::result::Result<CloseRequest, oneshot::error::RecvError>,
) {
    let request = request.unwrap_or(CloseRequest { code: NORMAL_CLOSURE, reason: COMPONENT_UNMOUNT });
    if let Err(e) = link.close(request.code, request.reason).await {
        debug!(generation, error = %e, "Close handshake failed");
    }
}

/// Link task: open, forward inbound items, close on request.
///
/// A close request that arrives while the open is still in flight drops the
/// attempt, so a late open never produces a live link. The next item is only
/// read once the previous one is queued for the driver.
async fn run_link(
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    endpoint: Endpoint,
    timeout: Duration,
    generation: u64,
    events: EventSender,
    mut close_rx: oneshot::Receiver<CloseRequest>,
) {
    let events = LinkEvents { generation, events };

    let opened = tokio::select! {
        _ = &mut close_rx => {
            debug!(generation, "Open abandoned by close request");
            return;
        }
        opened = open_with_timeout(transport.as_ref(), credentials.as_ref(), &endpoint, timeout) => opened,
    };

    let mut link: Box<dyn Link> = match opened {
        Ok(link) => link,
        Err(e) => {
            error!(generation, error = %e, "Failed to open link");
            if events.send(TransportEvent::Error(e.to_string())).await {
                events
                    .send(TransportEvent::Closed { code: None, reason: "connect failed".to_string() })
                    .await;
            }
            return;
        }
    };
    if !events.send(TransportEvent::Opened).await {
        return;
    }

    loop {
        let (event, finished) = tokio::select! {
            request = &mut close_rx => {
                close_on_request(link.as_mut(), generation, request).await;
                return;
            }
            inbound = link.recv() => match inbound {
                Some(Ok(Inbound::Text(text))) => (TransportEvent::Message(text), false),
                Some(Ok(Inbound::Closed { code, reason })) => {
                    (TransportEvent::Closed { code, reason }, true)
                }
                // One undecodable message; the link itself is fine
                Some(Err(e @ StreamError::MalformedMessage { .. })) => {
                    (TransportEvent::Malformed(e.to_string()), false)
                }
                Some(Err(e)) => {
                    if !events.send(TransportEvent::Error(e.to_string())).await {
                        return;
                    }
                    (TransportEvent::Closed { code: None, reason: "transport error".to_string() }, true)
                }
                None => (TransportEvent::Closed { code: None, reason: "stream ended".to_string() }, true),
            }
        };

        if finished {
            events.send(event).await;
            return;
        }
        tokio::select! {
            biased;
            request = &mut close_rx => {
                close_on_request(link.as_mut(), generation, request).await;
                return;
            }
            delivered = events.send(event) => {
                if !delivered {
                    return;
                }
            }
        }
    }
}
