//! TaskList: the durable, serializable state of one pipeline run.
//!
//! Invariants:
//! - No two entries share a `(phase, destination)` key (set semantics on `add`).
//! - `complete` is derived from emptiness and never serialized.
//! - Insertion order is kept for the wire; execution order comes from
//!   `pop_next` and the `PhaseOrder`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::phase::PhaseOrder;
use super::task::Task;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("task list is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Wire shape used for lenient decoding: entries are decoded one by one.
#[derive(Deserialize)]
struct RawTaskList {
    #[serde(default)]
    tasks: Vec<serde_json::Value>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// A run is complete when nothing is left to do.
    pub fn is_complete(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn contains(&self, task: &Task) -> bool {
        self.tasks.iter().any(|t| t.same_unit(task))
    }

    /// Add `task` unless a task with the same `(phase, destination)` is
    /// already present. Returns whether the task was added.
    pub fn add(&mut self, task: Task) -> bool {
        if self.contains(&task) {
            return false;
        }
        self.tasks.push(task);
        true
    }

    /// Set union. On a shared key the entry with more `progress` wins, the
    /// one already present on a tie. Returns the number of keys added.
    pub fn merge(&mut self, other: TaskList) -> usize {
        let mut added = 0;
        for task in other.tasks {
            match self.tasks.iter_mut().find(|t| t.same_unit(&task)) {
                Some(existing) => {
                    if task.progress() > existing.progress() {
                        *existing = task;
                    }
                }
                None => {
                    self.tasks.push(task);
                    added += 1;
                }
            }
        }
        added
    }

    /// Decode `s` leniently and merge it in. Returns `(added, skipped)`.
    pub fn merge_json(&mut self, s: &str) -> Result<(usize, usize), WireError> {
        let (other, skipped) = Self::from_json_lenient(s)?;
        Ok((self.merge(other), skipped))
    }

    /// Remove and return the next task to run.
    ///
    /// Order: in-flight tasks (started, or rescheduled at least once) before
    /// the rest, then ascending phase per `order`, then destination.
    pub fn pop_next(&mut self, order: &PhaseOrder) -> Option<Task> {
        let idx = self
            .tasks
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| priority(order, a, b))
            .map(|(i, _)| i)?;
        Some(self.tasks.remove(idx))
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Strict decode.
    pub fn from_json(s: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Decode a message, skipping entries that do not parse as a task.
    ///
    /// Fails only when the message itself is not a task list object. Returns
    /// the list and the number of skipped entries.
    pub fn from_json_lenient(s: &str) -> Result<(Self, usize), WireError> {
        let raw: RawTaskList = serde_json::from_str(s)?;
        let mut list = TaskList::new();
        let mut skipped = 0;
        for value in raw.tasks {
            match serde_json::from_value::<Task>(value) {
                Ok(task) => {
                    list.add(task);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unparsable task entry");
                    skipped += 1;
                }
            }
        }
        Ok((list, skipped))
    }
}

impl FromIterator<Task> for TaskList {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        let mut list = TaskList::new();
        for task in iter {
            list.add(task);
        }
        list
    }
}

fn priority(order: &PhaseOrder, a: &Task, b: &Task) -> Ordering {
    // in-flight first: `true` must sort before `false`
    b.is_in_flight()
        .cmp(&a.is_in_flight())
        .then_with(|| order.compare(a.phase(), b.phase()))
        .then_with(|| a.destination().cmp(b.destination()))
}
