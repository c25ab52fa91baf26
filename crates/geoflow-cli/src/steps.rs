//! Demo steps for the geocoder and export pipelines.
//!
//! Each step simulates its external system in memory (downloads, the search
//! index, the cluster, the remote export service) so the binary runs the full
//! control flow without infrastructure.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use geoflow_core::FlowError;
use geoflow_core::app::{Checkpoint, ParallelRunner, ParallelStep, SubPipeline};
use geoflow_core::domain::{ExecutionContext, StepOutcome, Task, TaskList};
use geoflow_core::impls::{PipelineStep, StepRegistry};
use geoflow_core::ports::{CreateResult, StepError, UpsertTarget, create_or_update};

pub const DOWNLOAD: &str = "osm.download";
pub const CONVERT: &str = "osm.convert";
pub const INDEX: &str = "es.build";
pub const ROLLOUT: &str = "k8s.rollout";
pub const EXPORT_START: &str = "export.start";
pub const EXPORT_POLL: &str = "export.poll";

const DATASET_HEADER: &str = "geoflow.dataset";
const EXPORT_JOB_HEADER: &str = "geoflow.export-job";

/// Conversion runs as three sub-steps: pbf -> json -> geojson.
const CONVERT_SUB_STEPS: u32 = 3;
const TARGET_REPLICAS: u32 = 3;

pub fn geocoder_registry() -> Result<StepRegistry, FlowError> {
    let mut registry = StepRegistry::new();
    registry.register(DOWNLOAD, Arc::new(Download))?;
    registry.register(CONVERT, Arc::new(Convert))?;
    registry.register(INDEX, Arc::new(IndexBuild::new()))?;
    registry.register(ROLLOUT, Arc::new(Rollout::new(Arc::new(FakeCluster::default()))))?;
    Ok(registry)
}

pub fn geocoder_destinations() -> [&'static str; 4] {
    [DOWNLOAD, CONVERT, INDEX, ROLLOUT]
}

pub fn geocoder_trigger() -> TaskList {
    [Task::new("DOWNLOAD", DOWNLOAD)].into_iter().collect()
}

pub fn export_registry() -> Result<StepRegistry, FlowError> {
    let service = Arc::new(FakeExportService::default());
    let mut registry = StepRegistry::new();
    registry.register(EXPORT_START, Arc::new(ExportStart { service: Arc::clone(&service) }))?;
    registry.register(EXPORT_POLL, Arc::new(ExportPoll { service }))?;
    Ok(registry)
}

pub fn export_destinations() -> [&'static str; 2] {
    [EXPORT_START, EXPORT_POLL]
}

pub fn export_trigger() -> TaskList {
    [Task::new("EXPORT", EXPORT_START)].into_iter().collect()
}

struct Download;

#[async_trait]
impl PipelineStep for Download {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
        let dataset = format!("osm-{}", ctx.correlation_id());
        tracing::info!(dataset = %dataset, "downloading osm extract");
        ctx.set_header(DATASET_HEADER, dataset);
        ctx.schedule_follow_up(Task::new("CONVERT", CONVERT));
        Ok(StepOutcome::Done)
    }
}

struct Convert;

#[async_trait]
impl PipelineStep for Convert {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
        let sub_step = ctx.task().sub_step();
        tracing::info!(sub_step, dataset = ctx.header(DATASET_HEADER), "converting");

        let next = if sub_step + 1 < CONVERT_SUB_STEPS {
            ctx.task().next_sub_step()
        } else {
            Task::new("INDEX", INDEX)
        };
        ctx.schedule_follow_up(next);
        Ok(StepOutcome::Done)
    }
}

/// Populates the five index sources in parallel, then schedules the rollout.
struct IndexBuild {
    parallel: ParallelStep,
}

impl IndexBuild {
    fn new() -> Self {
        let runner = [
            ("admin-units", 4),
            ("addresses", 8),
            ("place-names", 6),
            ("geodata-export", 3),
            ("transit-stops", 5),
        ]
        .into_iter()
        .fold(ParallelRunner::new(), |runner, (name, units)| {
            runner.branch(Arc::new(SourceLoader::new(name, units)))
        });
        Self {
            parallel: ParallelStep::new(runner),
        }
    }
}

#[async_trait]
impl PipelineStep for IndexBuild {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
        let outcome = self.parallel.execute(ctx).await?;
        ctx.schedule_follow_up(Task::new("DEPLOY", ROLLOUT));
        Ok(outcome)
    }
}

struct SourceLoader {
    name: String,
    units: u32,
}

impl SourceLoader {
    fn new(name: &str, units: u32) -> Self {
        Self {
            name: name.to_string(),
            units,
        }
    }
}

#[async_trait]
impl SubPipeline for SourceLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, checkpoint: &Checkpoint) -> Result<(), StepError> {
        for unit in 0..self.units {
            if !checkpoint.proceed() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            tracing::debug!(source = %self.name, unit, "indexed batch");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Deployment {
    name: String,
    image: String,
    replicas: u32,
}

/// In-memory stand-in for the cluster API.
#[derive(Default)]
struct FakeCluster {
    deployments: Mutex<HashMap<String, Deployment>>,
    ready: AtomicU32,
}

#[async_trait]
impl UpsertTarget for FakeCluster {
    type Payload = Deployment;

    async fn create(&self, payload: &Deployment) -> Result<CreateResult, StepError> {
        let mut deployments = self.deployments.lock().await;
        if deployments.contains_key(&payload.name) {
            return Ok(CreateResult::AlreadyExists);
        }
        deployments.insert(payload.name.clone(), payload.clone());
        Ok(CreateResult::Created)
    }

    async fn update(&self, payload: &Deployment) -> Result<(), StepError> {
        self.deployments
            .lock()
            .await
            .insert(payload.name.clone(), payload.clone());
        self.ready.store(0, Ordering::SeqCst);
        Ok(())
    }
}

/// Sub-step 0 applies the deployment; sub-step 1 polls until it is ready.
struct Rollout {
    cluster: Arc<FakeCluster>,
}

impl Rollout {
    fn new(cluster: Arc<FakeCluster>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl PipelineStep for Rollout {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
        if ctx.task().sub_step() == 0 {
            let deployment = Deployment {
                name: "pelias-api".to_string(),
                image: format!("pelias/api:{}", ctx.header(DATASET_HEADER).unwrap_or("latest")),
                replicas: TARGET_REPLICAS,
            };
            let applied = create_or_update(self.cluster.as_ref(), &deployment).await?;
            tracing::info!(
                deployment = %deployment.name,
                image = %deployment.image,
                replicas = deployment.replicas,
                outcome = ?applied,
                "deployment applied"
            );
            ctx.schedule_follow_up(ctx.task().next_sub_step());
            return Ok(StepOutcome::Done);
        }

        let ready = self.cluster.ready.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.set_header("replicas", format!("{ready}/{TARGET_REPLICAS}"));
        if ready < TARGET_REPLICAS {
            tracing::info!(ready, target = TARGET_REPLICAS, "waiting for replicas");
            return Ok(StepOutcome::Reschedule);
        }
        Ok(StepOutcome::Done)
    }
}

/// In-memory stand-in for the remote export service.
#[derive(Default)]
struct FakeExportService {
    polls: Mutex<HashMap<String, u32>>,
}

impl FakeExportService {
    async fn start(&self, job: &str) {
        self.polls.lock().await.insert(job.to_string(), 0);
    }

    /// Jobs finish after three polls.
    async fn poll(&self, job: &str) -> Option<bool> {
        let mut polls = self.polls.lock().await;
        let count = polls.get_mut(job)?;
        *count += 1;
        Some(*count >= 3)
    }
}

struct ExportStart {
    service: Arc<FakeExportService>,
}

#[async_trait]
impl PipelineStep for ExportStart {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
        let job = format!("export-{}", ctx.correlation_id());
        self.service.start(&job).await;
        tracing::info!(job = %job, "export started");
        ctx.set_header(EXPORT_JOB_HEADER, job);
        ctx.schedule_follow_up(Task::new("EXPORT", EXPORT_POLL));
        Ok(StepOutcome::Done)
    }
}

struct ExportPoll {
    service: Arc<FakeExportService>,
}

#[async_trait]
impl PipelineStep for ExportPoll {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
        let destination = ctx.task().destination().clone();
        let job = ctx
            .header(EXPORT_JOB_HEADER)
            .ok_or_else(|| StepError::failed(&destination, "no export job header"))?
            .to_string();

        match self.service.poll(&job).await {
            Some(true) => {
                tracing::info!(job = %job, "export finished");
                Ok(StepOutcome::Done)
            }
            Some(false) => Ok(StepOutcome::Reschedule),
            None => Err(StepError::failed(&destination, format!("unknown export job {job}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use geoflow_core::domain::{CorrelationId, Headers};
    use geoflow_core::ports::Dispatcher;

    fn ctx(task: Task, attributes: &Headers) -> ExecutionContext {
        ExecutionContext::rehydrate(task, attributes, || CorrelationId::new("corr-test"))
    }

    #[tokio::test]
    async fn registries_cover_their_destinations() {
        let geocoder = geocoder_registry().unwrap();
        assert!(geocoder_destinations().iter().all(|d| geocoder.supports(&(*d).into())));
        let export = export_registry().unwrap();
        assert!(export_destinations().iter().all(|d| export.supports(&(*d).into())));
    }

    #[tokio::test]
    async fn convert_walks_sub_steps_then_indexes() {
        let mut c = ctx(Task::new("CONVERT", CONVERT), &Headers::new());
        Convert.execute(&mut c).await.unwrap();
        assert_eq!(c.follow_up().map(Task::sub_step), Some(1));

        let mut c = ctx(Task::new("CONVERT", CONVERT).with_sub_step(2), &Headers::new());
        Convert.execute(&mut c).await.unwrap();
        assert_eq!(c.follow_up().map(|t| t.destination().as_str()), Some(INDEX));
    }

    #[tokio::test]
    async fn rollout_upserts_then_polls_until_ready() {
        let cluster = Arc::new(FakeCluster::default());
        let rollout = Rollout::new(Arc::clone(&cluster));

        for _ in 0..2 {
            let mut c = ctx(Task::new("DEPLOY", ROLLOUT), &Headers::new());
            assert_eq!(rollout.execute(&mut c).await.unwrap(), StepOutcome::Done);
        }
        assert_eq!(cluster.deployments.lock().await.len(), 1);

        let mut outcomes = Vec::new();
        for _ in 0..TARGET_REPLICAS {
            let mut c = ctx(Task::new("DEPLOY", ROLLOUT).with_sub_step(1), &Headers::new());
            outcomes.push(rollout.execute(&mut c).await.unwrap());
        }
        assert_eq!(
            outcomes,
            vec![StepOutcome::Reschedule, StepOutcome::Reschedule, StepOutcome::Done]
        );
    }

    #[tokio::test]
    async fn export_poll_without_job_fails() {
        let poll = ExportPoll {
            service: Arc::new(FakeExportService::default()),
        };
        let mut c = ctx(Task::new("EXPORT", EXPORT_POLL), &Headers::new());
        assert!(poll.execute(&mut c).await.is_err());
    }
}
