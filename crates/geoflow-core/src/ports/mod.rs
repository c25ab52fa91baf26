//! Ports - 外部システムへの抽象化レイヤー
//!
//! Every external collaborator of the engine sits behind one of these traits:
//! the task channel, the step dispatcher, the status sink, the leader lock.
//! The engine depends on nothing else; production adapters live outside this
//! crate and in-memory ones live in `impls`.

pub mod channel;
pub mod clock;
pub mod dispatch;
pub mod event_sink;
pub mod id_generator;
pub mod leader_lock;
pub mod upsert;

pub use self::channel::{ChannelError, Message, TaskChannel};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dispatch::{Dispatcher, StepError};
pub use self::event_sink::{EventSink, SinkError};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::leader_lock::{LeaderLock, LockError};
pub use self::upsert::{CreateResult, UpsertOutcome, UpsertTarget, create_or_update};
