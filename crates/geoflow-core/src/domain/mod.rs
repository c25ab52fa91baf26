//! Domain model (tasks, task lists, execution context, retry, events).

pub mod context;
pub mod events;
pub mod headers;
pub mod ids;
pub mod outcome;
pub mod phase;
pub mod retry;
pub mod task;
pub mod task_list;

pub use context::{Dehydrated, ExecutionContext};
pub use events::{JobEvent, JobState};
pub use headers::{CORRELATION_ID, CarryOver, DEFAULT_CARRY_PREFIX, Headers, LOOP_COUNTER};
pub use ids::{BatchId, CorrelationId};
pub use outcome::StepOutcome;
pub use phase::{Phase, PhaseOrder};
pub use retry::{RetryPolicy, Verdict};
pub use task::{Destination, Task, TaskKey};
pub use task_list::{TaskList, WireError};
