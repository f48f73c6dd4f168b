// Time utilities
// (c) 2024 Ross Younger

use std::time::{Duration, Instant};

/// A simple stopwatch, running from the moment it is created.
/// This stopwatch does not support resuming or splits.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
    stop: Option<Instant>,
}

impl Stopwatch {
    /// Creates a running stopwatch
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            stop: None,
        }
    }

    /// Stops this stopwatch, returning the elapsed time.
    /// Panics: It is a logic error to call stop more than once.
    pub fn stop(&mut self) -> Option<Duration> {
        assert!(self.stop.is_none(), "Stopwatch already stopped");
        self.stop = Some(Instant::now());
        self.elapsed()
    }

    /// Time between start and stop, if the stopwatch has been stopped
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.stop.map(|stop| stop - self.start)
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}
