//! Stream combinators for status subscriptions

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
