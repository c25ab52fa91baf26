//! Idempotent upsert convention for external targets.
//!
//! A create that reports "already exists" is retried once as an update with
//! the same payload. Both results mean the step is done.

use async_trait::async_trait;

use super::dispatch::StepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateResult {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[async_trait]
pub trait UpsertTarget: Send + Sync {
    type Payload: Send + Sync;

    async fn create(&self, payload: &Self::Payload) -> Result<CreateResult, StepError>;

    async fn update(&self, payload: &Self::Payload) -> Result<(), StepError>;
}

/// Create `payload`, updating it instead when it already exists.
pub async fn create_or_update<T>(target: &T, payload: &T::Payload) -> Result<UpsertOutcome, StepError>
where
    T: UpsertTarget + ?Sized,
{
    match target.create(payload).await? {
        CreateResult::Created => Ok(UpsertOutcome::Created),
        CreateResult::AlreadyExists => {
            tracing::debug!("create reported already exists, updating instead");
            target.update(payload).await?;
            Ok(UpsertOutcome::Updated)
        }
    }
}
