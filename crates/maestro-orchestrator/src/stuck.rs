use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckCheck {
    Healthy,
    /// First detection: no progress for longer than the threshold.
    Suspected { idle: Duration },
    /// Second consecutive detection; the caller should recover.
    Stuck { idle: Duration },
}

/// Liveness monitor based on time since the last observed progress.
///
/// Independent of per-step timeouts: a step can be well within its deadline
/// and still be reported stuck. Uses tokio's clock so tests can pause time.
#[derive(Debug)]
pub struct StuckDetector {
    threshold: Duration,
    last_progress: Instant,
    consecutive: u32,
}

impl StuckDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_progress: Instant::now(),
            consecutive: 0,
        }
    }

    pub fn record_progress(&mut self) {
        self.last_progress = Instant::now();
        self.consecutive = 0;
    }

    pub fn idle(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_progress)
    }

    pub fn consecutive_detections(&self) -> u32 {
        self.consecutive
    }

    pub fn check(&mut self) -> StuckCheck {
        let idle = self.idle();
        if idle <= self.threshold {
            self.consecutive = 0;
            return StuckCheck::Healthy;
        }
        self.consecutive += 1;
        if self.consecutive >= 2 {
            warn!(idle_ms = idle.as_millis() as u64, "Stuck detected twice in a row");
            self.consecutive = 0;
            StuckCheck::Stuck { idle }
        } else {
            debug!(idle_ms = idle.as_millis() as u64, "No progress past threshold");
            StuckCheck::Suspected { idle }
        }
    }
}
