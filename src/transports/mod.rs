//! Transport implementations

pub mod websocket;

pub use websocket::{WebSocketLink, WebSocketTransport};
