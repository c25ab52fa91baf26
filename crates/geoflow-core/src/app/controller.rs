//! RetryController - per-task state machine
//!
//! RUNNING -> DONE -> FINISHED
//! RUNNING -> RESCHEDULE -> DELAYED -> RUNNING
//! RUNNING -> RESCHEDULE (loop_counter > max_retries) -> TIMED_OUT

use crate::domain::{RetryPolicy, StepOutcome, Verdict};

#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    /// Controller applying `policy` to every task of one pipeline.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy this controller applies.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide what happens to a task that ran with `loop_counter` and
    /// returned `outcome`.
    pub fn decide(&self, outcome: StepOutcome, loop_counter: u32) -> Verdict {
        if outcome.is_done() {
            return Verdict::Finished;
        }
        let next = loop_counter.saturating_add(1);
        if self.policy.is_exhausted(next) {
            Verdict::TimedOut { loop_counter: next }
        } else {
            Verdict::Retry {
                loop_counter: next,
                delay: self.policy.next_delay(next),
            }
        }
    }
}
