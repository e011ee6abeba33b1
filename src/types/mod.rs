//! Core types for the streaming data model.
//!
//! - [`Frame`] is one immutable message received from the producer
//! - [`ConnectionState`] and [`QualityLabel`] describe live connection health
//! - [`Metrics`] and [`StreamStatus`] are what consumers observe
//! - [`UpdateRate`] controls how often status subscriptions emit

mod frame;
mod metrics;
mod state;
mod update_rate;

pub use frame::{Frame, FrameKind, RunStatus, SequenceHint};
pub use metrics::{Metrics, StreamStatus};
pub use state::{ConnectionState, QualityLabel};
pub use update_rate::UpdateRate;
