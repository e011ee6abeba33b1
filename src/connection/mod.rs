//! Connection lifecycle: a pure state machine and the task that drives it

pub(crate) mod driver;
pub mod machine;


pub use machine::{Action, CLIENT_DISCONNECT, COMPONENT_UNMOUNT, StreamMachine, TransportEvent};
