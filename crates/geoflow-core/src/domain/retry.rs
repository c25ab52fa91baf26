//! Retry policy: bounded, fixed-delay polling.

use std::time::Duration;

/// Retry policy for rescheduled tasks.
///
/// The delay is fixed. Awaited conditions (a deployment reaching N replicas,
/// a remote export finishing) have no useful backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial invocation.
    pub max_retries: u32,

    /// Wait between invocations.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Main geocoder pipeline default: 600 retries, 15s apart.
    pub fn geocoder_default() -> Self {
        Self::new(600, Duration::from_millis(15_000))
    }

    /// Export polling default: 480 retries, 15s apart.
    pub fn export_default() -> Self {
        Self::new(480, Duration::from_millis(15_000))
    }

    /// Delay before the next invocation. Independent of the attempt number.
    pub fn next_delay(&self, _loop_counter: u32) -> Duration {
        self.delay
    }

    /// Whether a task whose counter reached `loop_counter` has run out.
    pub fn is_exhausted(&self, loop_counter: u32) -> bool {
        loop_counter > self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::geocoder_default()
    }
}

/// What the retry controller decided for the current task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Step is done; continue with the rest of the list.
    Finished,

    /// Re-invoke the same task after `delay`; `loop_counter` is the value to
    /// store on it.
    Retry { loop_counter: u32, delay: Duration },

    /// Retries exhausted; the task is dropped.
    TimedOut { loop_counter: u32 },
}
