//! Resilient real-time frame streaming for long-running simulations.
//!
//! Framestream follows a single producer stream over WebSocket and keeps a
//! consumer informed about it: frames in arrival order, connection state,
//! latency-derived quality and running metrics.
//!
//! # Features
//!
//! - **Reconnection**: exponential backoff (1s doubling to a 30s cap), reset on success
//! - **Backpressure**: a bounded buffer that sheds ordinary frames before keyframes
//! - **Quality tracking**: average producer latency mapped to Good / Lagging
//! - **Observable**: status published through a watch channel, optionally throttled
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framestream::{ConnectionState, FrameStream, StreamConfig, UpdateRate};
//! use futures::StreamExt;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StreamConfig::new("ws://localhost:8080", "run_123");
//!     let client = FrameStream::connect(config, "access-token")?;
//!     client.wait_for_state(ConnectionState::Connected, Duration::from_secs(5)).await?;
//!
//!     let mut frames = std::pin::pin!(client.frames_stream());
//!     while let Some(frame) = frames.next().await {
//!         println!("timestep {:?} keyframe={}", frame.sequence.timestep, frame.is_keyframe);
//!         if frame.is_final {
//!             break;
//!         }
//!     }
//!
//!     let status = client.status();
//!     println!("{} frames dropped", status.metrics.frames_dropped);
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Streaming building blocks
pub mod backoff;
pub mod buffer;
pub mod protocol;
pub mod quality;

// Connection architecture
pub mod client;
pub mod config;
pub mod connection;
pub mod stream;
pub mod transport;
pub mod transports;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use backoff::Backoff;
pub use buffer::FrameBuffer;
pub use client::StreamClient;
pub use config::{BackoffConfig, CredentialProvider, Endpoint, StaticToken, StreamConfig, StreamUrl};
pub use quality::QualityClassifier;
pub use transport::{Inbound, Link, Transport};
pub use transports::WebSocketTransport;

/// Unified entry point for frame streams.
///
/// ```rust,no_run
/// use framestream::{FrameStream, StreamConfig};
///
/// # #[tokio::main]
/// # async fn main() -> framestream::Result<()> {
/// let config = StreamConfig::from_file("stream.yaml")?;
/// let client = FrameStream::connect(config, "access-token")?;
/// # Ok(())
/// # }
/// ```
pub struct FrameStream;

impl FrameStream {
    /// Create a client without dialling.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no tokio runtime
    /// is running.
    pub fn client(config: StreamConfig, credentials: impl CredentialProvider) -> Result<StreamClient> {
        StreamClient::new(config, credentials)
    }

    /// Create a client and start connecting.
    ///
    /// Returns as soon as the first attempt is under way; use
    /// [`StreamClient::wait_for_state`] to wait for the link.
    pub fn connect(config: StreamConfig, credentials: impl CredentialProvider) -> Result<StreamClient> {
        let client = StreamClient::new(config, credentials)?;
        client.connect()?;
        Ok(client)
    }
}
