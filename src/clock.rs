use std::time::{Duration, Instant};

/// Monotonic session time in seconds, shared by every component that stamps notes.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// Wall time left until `time`, zero if it already passed.
    pub fn until(&self, time: f64) -> Duration {
        Duration::try_from_secs_f64(time - self.now()).unwrap_or(Duration::ZERO)
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
