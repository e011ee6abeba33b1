//! Latency-derived connection quality

use crate::types::QualityLabel;

/// Mean latency below this is `Good`
pub const GOOD_LATENCY_MS: f64 = 200.0;

/// Mean latency above this is severely degraded. It still maps to `Lagging`.
pub const SEVERE_LATENCY_MS: f64 = 1000.0;

/// Classify a mean latency.
///
/// The 200-1000ms band and the >1000ms band share the `Lagging` label.
/// `Disconnected` never comes from latency; only transport loss sets it.
#[allow(clippy::if_same_then_else)]
pub fn classify(average_ms: f64) -> QualityLabel {
    if average_ms < GOOD_LATENCY_MS {
        QualityLabel::Good
    } else if average_ms <= SEVERE_LATENCY_MS {
        QualityLabel::Lagging
    } else {
        QualityLabel::Lagging
    }
}

/// Cumulative mean over every latency sample since the last reset
#[derive(Debug, Clone, Default)]
pub struct QualityClassifier {
    sum_ms: f64,
    count: u64,
}

impl QualityClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample; non-finite or negative samples are ignored.
    pub fn record(&mut self, sample_ms: f64) {
        if !sample_ms.is_finite() || sample_ms < 0.0 {
            return;
        }
        self.sum_ms += sample_ms;
        self.count += 1;
    }

    pub fn average_ms(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_ms / self.count as f64)
    }

    pub fn samples(&self) -> u64 {
        self.count
    }

    /// Label for a live connection; no samples yet reads as `Good`.
    pub fn label(&self) -> QualityLabel {
        self.average_ms().map_or(QualityLabel::Good, classify)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
