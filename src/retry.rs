use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::{error, warn};

/// Waits between consecutive attempts; `intervals.len() + 1` attempts total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    intervals: Vec<Duration>,
}

impl BackoffSchedule {
    pub fn new(intervals: Vec<Duration>) -> Self {
        Self { intervals }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn intervals(&self) -> &[Duration] {
        &self.intervals
    }

    pub fn max_attempts(&self) -> usize {
        self.intervals.len() + 1
    }
}

impl Default for BackoffSchedule {
    /// 30 min, 1 h, 2 h, 4 h, 8 h.
    fn default() -> Self {
        Self::from_secs(&[1800, 3600, 7200, 14400, 28800])
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread; the batch job owns the process while it waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Runs `work` until it succeeds or the schedule is exhausted, returning the
/// last error unchanged in the latter case.
pub fn run_with_backoff<T, E, F>(
    schedule: &BackoffSchedule,
    sleeper: &dyn Sleeper,
    mut work: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut(usize) -> Result<T, E>,
{
    let max_attempts = schedule.max_attempts();
    let mut attempt = 1usize;
    loop {
        match work(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(wait) = schedule.intervals().get(attempt - 1).copied() else {
                    error!(attempt, max_attempts, error = %err, "giving up after final attempt");
                    return Err(err);
                };
                warn!(
                    attempt,
                    max_attempts,
                    error = %err,
                    wait_secs = wait.as_secs(),
                    "attempt failed, backing off"
                );
                sleeper.sleep(wait);
                attempt += 1;
            }
        }
    }
}
