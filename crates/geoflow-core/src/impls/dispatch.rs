//! StepRegistry - destination と step を 1:1 でマッピングする Dispatcher
//!
//! # 学習ポイント
//! - `Arc<dyn PipelineStep>` による type erasure
//! - 重複登録は起動時に FlowError::DuplicateStep で弾く

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Destination, ExecutionContext, StepOutcome};
use crate::error::FlowError;
use crate::ports::{Dispatcher, StepError};

/// One external step (download, convert, index build, rollout poll, ...).
#[async_trait]
pub trait PipelineStep: Send + Sync {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError>;
}

/// Registry of steps (destination -> step).
///
/// Built during initialization (mutable), used during runtime (immutable).
#[derive(Default)]
pub struct StepRegistry {
    steps: HashMap<Destination, Arc<dyn PipelineStep>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    /// Register `step` for `destination`. A destination can be registered once.
    pub fn register(
        &mut self,
        destination: impl Into<Destination>,
        step: Arc<dyn PipelineStep>,
    ) -> Result<(), FlowError> {
        let destination = destination.into();
        if self.steps.contains_key(&destination) {
            return Err(FlowError::DuplicateStep(destination));
        }
        self.steps.insert(destination, step);
        Ok(())
    }

    pub fn get(&self, destination: &Destination) -> Option<&Arc<dyn PipelineStep>> {
        self.steps.get(destination)
    }

    /// Registered destinations, sorted.
    pub fn destinations(&self) -> Vec<Destination> {
        let mut out: Vec<_> = self.steps.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[async_trait]
impl Dispatcher for StepRegistry {
    async fn invoke(
        &self,
        destination: &Destination,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        let step = self
            .get(destination)
            .ok_or_else(|| StepError::UnknownDestination(destination.clone()))?;
        step.execute(ctx).await
    }

    fn supports(&self, destination: &Destination) -> bool {
        self.steps.contains_key(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Headers, Task};

    struct OkStep;

    #[async_trait]
    impl PipelineStep for OkStep {
        async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            Ok(StepOutcome::Done)
        }
    }

    fn ctx_for(destination: &str) -> ExecutionContext {
        ExecutionContext::rehydrate(Task::new("INDEX", destination), &Headers::new(), || {
            crate::domain::CorrelationId::new("c")
        })
    }

    #[tokio::test]
    async fn invokes_registered_step() {
        let mut reg = StepRegistry::new();
        reg.register("es.build", Arc::new(OkStep)).unwrap();

        let mut ctx = ctx_for("es.build");
        let outcome = reg.invoke(&"es.build".into(), &mut ctx).await.unwrap();
        assert_eq!(outcome, StepOutcome::Done);
        assert!(reg.supports(&"es.build".into()));
    }

    #[tokio::test]
    async fn unknown_destination_is_an_error() {
        let reg = StepRegistry::new();
        let mut ctx = ctx_for("missing");
        let err = reg.invoke(&"missing".into(), &mut ctx).await.unwrap_err();
        assert!(matches!(err, StepError::UnknownDestination(_)));
        assert!(!reg.supports(&"missing".into()));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = StepRegistry::new();
        reg.register("a", Arc::new(OkStep)).unwrap();
        let err = reg.register("a", Arc::new(OkStep)).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateStep(d) if d.as_str() == "a"));
        assert_eq!(reg.len(), 1);
    }
}
