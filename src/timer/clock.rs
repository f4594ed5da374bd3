use std::time::{Duration, Instant};

use crate::error::{TimerError, TimerResult};

/// Monotonic time, read as an offset from an arbitrary fixed origin.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Duration;
}

/// Backed by `Instant`, so wall-clock edits and DST shifts do not move it.
#[derive(Debug, Clone)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[cfg(test)]
pub use manual::ManualTimeSource;

#[cfg(test)]
mod manual {
    use super::TimeSource;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Test clock that only moves when told to. Clones share the same reading.
    #[derive(Debug, Clone, Default)]
    pub struct ManualTimeSource {
        millis: Arc<AtomicU64>,
    }

    impl ManualTimeSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn advance(&self, by: Duration) {
            self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }

        pub fn advance_secs(&self, secs: u64) {
            self.advance(Duration::from_secs(secs));
        }
    }

    impl TimeSource for ManualTimeSource {
        fn now(&self) -> Duration {
            Duration::from_millis(self.millis.load(Ordering::SeqCst))
        }
    }
}

/// Pausable accumulator of active time.
#[derive(Debug)]
pub struct SessionClock<S: TimeSource> {
    source: S,
    banked: Duration,
    running_since: Option<Duration>,
}

impl<S: TimeSource> SessionClock<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            banked: Duration::ZERO,
            running_since: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Begins accumulating on top of whatever is already banked. No-op if running.
    pub fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(self.source.now());
        }
    }

    pub fn resume(&mut self) {
        self.start();
    }

    /// Stops accumulating and returns the whole seconds banked so far.
    pub fn pause(&mut self) -> u64 {
        if let Some(since) = self.running_since.take() {
            self.banked += self.source.now().saturating_sub(since);
        }
        self.elapsed()
    }

    pub fn elapsed_duration(&self) -> Duration {
        match self.running_since {
            Some(since) => self.banked + self.source.now().saturating_sub(since),
            None => self.banked,
        }
    }

    /// Whole seconds accumulated, including the running interval.
    pub fn elapsed(&self) -> u64 {
        self.elapsed_duration().as_secs()
    }

    pub fn reset(&mut self) -> TimerResult<()> {
        if self.is_running() {
            return Err(TimerError::InvalidTransition {
                state: "accumulating",
                command: "reset clock",
            });
        }
        self.banked = Duration::ZERO;
        Ok(())
    }

    /// Replaces the banked total, e.g. when restoring an interrupted session.
    pub fn restore(&mut self, banked: Duration) -> TimerResult<()> {
        if self.is_running() {
            return Err(TimerError::InvalidTransition {
                state: "accumulating",
                command: "restore clock",
            });
        }
        self.banked = banked;
        Ok(())
    }
}
