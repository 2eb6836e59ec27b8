use std::time::{Duration, Instant};

/// Enforces a minimum interval between consecutive outbound calls.
///
/// The first call goes out immediately; later calls sleep for whatever part of
/// the interval network latency has not already used up. A clone carries the
/// time of the last call, so spacing survives a handoff between engines.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the next call is allowed, then mark it as issued.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}
