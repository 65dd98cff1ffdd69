use std::thread;
use std::time::Duration;

/// How busy compute elements are retried.
///
/// The delay before a new attempt grows linearly: the n-th retry (starting at 0) waits
/// `step * (n + 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Policy {
    attempts: u32,
    step: Duration,
}

impl Policy {
    /// Create a new policy allowing the given number of attempts.
    pub fn new(attempts: u32, step: Duration) -> Self {
        Self {
            attempts,
            step,
        }
    }

    /// Get the maximum number of attempts.
    pub fn get_attempts(&self) -> u32 {
        self.attempts
    }

    /// Get the delay to wait after the given failed attempt (starting at 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step * (attempt + 1)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(50, Duration::from_secs(60))
    }
}

/// Something putting the current thread asleep.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// A sleeper blocking the current thread.
pub struct ThreadSleeper {}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
