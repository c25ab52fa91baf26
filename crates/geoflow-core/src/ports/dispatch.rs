//! Dispatcher port - invokes the external step named by a destination.
//!
//! # v1 デフォルト
//! - StepRegistry: destination -> PipelineStep の 1:1 マッピング（impls::dispatch）

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Destination, ExecutionContext, StepOutcome};

#[derive(Debug, Error)]
pub enum StepError {
    #[error("no step registered for destination={0}")]
    UnknownDestination(Destination),

    #[error("step {destination} failed: {message}")]
    Failed {
        destination: Destination,
        message: String,
    },

    #[error("validation failed in {destination}: {message}")]
    Validation {
        destination: Destination,
        message: String,
    },
}

impl StepError {
    pub fn failed(destination: &Destination, message: impl Into<String>) -> Self {
        Self::Failed {
            destination: destination.clone(),
            message: message.into(),
        }
    }
}

/// Stateless from the engine's point of view: `(destination, context) -> outcome`.
///
/// Steps must be safe to repeat after a redelivery; that guarantee belongs to
/// the step, not to the engine.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn invoke(
        &self,
        destination: &Destination,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepError>;

    /// Whether `destination` resolves. Used for fail-fast wiring checks;
    /// dispatchers that resolve lazily keep the default.
    fn supports(&self, _destination: &Destination) -> bool {
        true
    }
}
