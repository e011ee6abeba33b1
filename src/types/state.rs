//! Connection lifecycle and health labels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a logical stream.
///
/// Transitions are driven exclusively by the connection state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting on the backoff timer before the next attempt
    Reconnecting,
}

impl ConnectionState {
    /// A transport is open or being opened
    pub fn has_transport(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Coarse connection health indicator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum QualityLabel {
    Good,
    Lagging,
    #[default]
    Disconnected,
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityLabel::Good => "good",
            QualityLabel::Lagging => "lagging",
            QualityLabel::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}
