use std::fmt;

use serde::{Deserialize, Serialize};

use super::headers::{Headers, LOOP_COUNTER};
use super::phase::Phase;

/// Opaque name of the external step a task is dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Destination {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Logical identity of a task: two tasks are the same unit iff their keys match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub phase: Phase,
    pub destination: Destination,
}

/// One unit of work.
///
/// Tasks are values: nothing mutates a task after creation. Progress and retry
/// state are expressed by building a new task (`next_sub_step`, `with_header`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    phase: Phase,
    #[serde(default)]
    sub_step: u32,
    destination: Destination,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    headers: Headers,
}

impl Task {
    /// A not-yet-started task.
    pub fn new(phase: impl Into<Phase>, destination: impl Into<Destination>) -> Self {
        Self {
            phase: phase.into(),
            sub_step: 0,
            destination: destination.into(),
            headers: Headers::new(),
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn sub_step(&self) -> u32 {
        self.sub_step
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn key(&self) -> TaskKey {
        TaskKey {
            phase: self.phase.clone(),
            destination: self.destination.clone(),
        }
    }

    pub fn same_unit(&self, other: &Task) -> bool {
        self.phase == other.phase && self.destination == other.destination
    }

    /// `sub_step > 0`: resumed mid-execution.
    pub fn is_started(&self) -> bool {
        self.sub_step > 0
    }

    /// Started or being re-invoked after a reschedule. In-flight tasks are
    /// picked before anything else in their list.
    pub fn is_in_flight(&self) -> bool {
        self.is_started() || self.loop_counter() > 0
    }

    /// How far this unit has got: `(sub_step, loop_counter)`.
    pub fn progress(&self) -> (u32, u32) {
        (self.sub_step, self.loop_counter())
    }

    /// Retry counter stored on the task, `0` when absent or unreadable.
    pub fn loop_counter(&self) -> u32 {
        self.header(LOOP_COUNTER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn with_sub_step(mut self, sub_step: u32) -> Self {
        self.sub_step = sub_step;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Follow-up for a multi-step operation: same unit, next sub-step, fresh
    /// headers.
    pub fn next_sub_step(&self) -> Self {
        Self {
            phase: self.phase.clone(),
            sub_step: self.sub_step + 1,
            destination: self.destination.clone(),
            headers: Headers::new(),
        }
    }

    pub(crate) fn without_header(mut self, key: &str) -> Self {
        self.headers.remove(key);
        self
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.phase, self.destination, self.sub_step)
    }
}
