//! Update rate control for status subscriptions

use serde::{Deserialize, Serialize};

/// Update rate for status subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum UpdateRate {
    /// Every published change
    Native,

    /// Throttled to maximum Hz
    /// A rate of zero means no throttling
    Max(u32),
}

impl UpdateRate {
    /// Normalize the rate, folding `Max(0)` into `Native`
    pub fn normalize(self) -> Self {
        match self {
            UpdateRate::Max(0) => UpdateRate::Native,
            other => other,
        }
    }

    /// Get throttle interval if needed
    pub fn throttle_interval(self) -> Option<std::time::Duration> {
        match self.normalize() {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(std::time::Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
