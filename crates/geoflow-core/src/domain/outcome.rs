//! Outcome of one dispatched step.
//!
//! Errors are not an outcome: a step that fails returns `Err(StepError)` and
//! the run aborts. The outcome only says whether the step is finished.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    /// Nothing more to do for this task. A follow-up, if any, is scheduled
    /// on the execution context.
    Done,

    /// Not finished yet; poll again after the retry delay.
    Reschedule,
}

impl StepOutcome {
    pub fn is_done(self) -> bool {
        matches!(self, StepOutcome::Done)
    }
}
