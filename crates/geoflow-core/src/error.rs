use thiserror::Error;

use crate::app::BuildError;
use crate::config::ConfigError;
use crate::domain::{Destination, WireError};
use crate::ports::{ChannelError, LockError};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("duplicate step for destination={0}")]
    DuplicateStep(Destination),

    #[error("not the leader for queue={0}")]
    NotLeader(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),
}
