//! Transport trait for frame producers

use crate::Result;
use crate::config::StreamUrl;

/// One inbound item from an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text message, not yet decoded
    Text(String),
    /// The remote side closed the link
    Closed { code: Option<u16>, reason: String },
}

/// Close code for a normal, client-initiated closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Opens links to a frame producer.
///
/// Implementations only move bytes; reconnection, parsing and buffering all
/// happen above this seam, so tests can substitute a scripted transport.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a link to `url`
    ///
    /// The driver bounds this call with the configured connect timeout.
    async fn open(&self, url: &StreamUrl) -> Result<Box<dyn Link>>;
}

/// An open, bidirectional link
#[async_trait::async_trait]
pub trait Link: Send {
    /// Next inbound item
    ///
    /// Returns:
    /// - `Some(Ok(item))` - Message or remote close
    /// - `Some(Err(StreamError::MalformedMessage))` - One undecodable message;
    ///   the link stays usable
    /// - `Some(Err(e))` - Any other error is a transport failure; the link is
    ///   unusable afterwards
    /// - `None` - The link ended without a close frame
    ///
    /// Must be cancel-safe: the driver races it against close requests.
    async fn recv(&mut self) -> Option<Result<Inbound>>;

    /// Close the link with `code` and a human-readable `reason`
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}
