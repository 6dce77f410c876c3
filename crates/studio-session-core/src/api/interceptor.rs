use std::sync::Mutex;

use reqwest::StatusCode;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Buffer for interceptor signals; subscribers only care about the latest.
const SIGNAL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// A successful response cleared the counter.
    Reset,
    /// Neither a success nor a 401.
    Unchanged,
    Unauthorized { consecutive: u32 },
    /// The 401 threshold was reached; the counter restarts from zero.
    ThresholdReached { consecutive: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorSignal {
    UnauthorizedThreshold { consecutive: u32 },
}

/// Response observer shared by every outbound request.
///
/// Created once by the composition root. The 401 counter is global across
/// endpoints: a 401 from any call counts toward the same threshold.
pub struct AuthInterceptor {
    consecutive_unauthorized: Mutex<u32>,
    threshold: u32,
    signals: broadcast::Sender<InterceptorSignal>,
}

impl AuthInterceptor {
    pub fn new(threshold: u32) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            consecutive_unauthorized: Mutex::new(0),
            threshold,
            signals,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InterceptorSignal> {
        self.signals.subscribe()
    }

    /// Feed one response status through the counter.
    pub fn observe(&self, status: StatusCode) -> Observation {
        let mut count = self
            .consecutive_unauthorized
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        if status.is_success() {
            if *count > 0 {
                debug!(previous = *count, "Successful response reset 401 counter");
            }
            *count = 0;
            return Observation::Reset;
        }

        if status != StatusCode::UNAUTHORIZED {
            return Observation::Unchanged;
        }

        *count += 1;
        let consecutive = *count;
        if consecutive < self.threshold {
            debug!(consecutive, threshold = self.threshold, "Unauthorized response");
            return Observation::Unauthorized { consecutive };
        }

        *count = 0;
        drop(count);
        warn!(consecutive, "Consecutive unauthorized responses reached threshold");
        // No subscriber simply means no monitor is mounted
        let _ = self
            .signals
            .send(InterceptorSignal::UnauthorizedThreshold { consecutive });
        Observation::ThresholdReached { consecutive }
    }

    pub fn consecutive_unauthorized(&self) -> u32 {
        *self
            .consecutive_unauthorized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
