//! Engine - one iteration of a pipeline run
//!
//! # フロー
//! 1. Batch の TaskList から pop_next で 1 件取り出す
//! 2. ExecutionContext に rehydrate
//! 3. Dispatcher::invoke → StepOutcome
//! 4. RetryController::decide → Verdict
//! 5. ContinuationDriver::advance（OK / requeue）
//!
//! An iteration owns its TaskList and hands it off by value: when
//! `run_iteration` returns, the run lives only on the channel.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use crate::domain::{
    CORRELATION_ID, CarryOver, CorrelationId, ExecutionContext, Headers, JobState, PhaseOrder,
    RetryPolicy, TaskList, Verdict,
};
use crate::error::FlowError;
use crate::ports::{Dispatcher, IdGenerator, Message, TaskChannel};

use super::aggregator::Batch;
use super::continuation::{Continuation, ContinuationDriver};
use super::controller::RetryController;
use super::emitter::EventEmitter;

/// Identity and policy of one configured pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub name: String,
    pub topic: String,
    pub domain: String,
    pub action: String,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    /// Settings for pipeline `name` on `topic`; domain and action derive from the name.
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            domain: name.to_uppercase(),
            action: format!("{name}.run"),
            name,
            topic: topic.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Domain reported on every event.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Action reported on `PENDING` and `OK`.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

pub struct Engine {
    settings: PipelineSettings,
    order: PhaseOrder,
    carry: CarryOver,
    dispatcher: Arc<dyn Dispatcher>,
    channel: Arc<dyn TaskChannel>,
    ids: Arc<dyn IdGenerator>,
    controller: RetryController,
    continuation: ContinuationDriver,
    emitter: EventEmitter,
}

impl Engine {
    /// Wire an engine. Prefer `EngineBuilder`, which validates the wiring.
    pub(crate) fn new(
        settings: PipelineSettings,
        order: PhaseOrder,
        carry: CarryOver,
        dispatcher: Arc<dyn Dispatcher>,
        channel: Arc<dyn TaskChannel>,
        ids: Arc<dyn IdGenerator>,
        emitter: EventEmitter,
    ) -> Self {
        let controller = RetryController::new(settings.retry);
        let continuation =
            ContinuationDriver::new(Arc::clone(&channel), settings.topic.as_str(), settings.action.as_str());
        Self {
            settings,
            order,
            carry,
            dispatcher,
            channel,
            ids,
            controller,
            continuation,
            emitter,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Topic the pipeline consumes and requeues on.
    pub fn topic(&self) -> &str {
        &self.settings.topic
    }

    pub fn channel(&self) -> &Arc<dyn TaskChannel> {
        &self.channel
    }

    /// Generator for correlation and batch ids.
    pub fn ids(&self) -> &Arc<dyn IdGenerator> {
        &self.ids
    }

    /// Start a run: publish `list` on the pipeline topic and emit `PENDING`.
    ///
    /// A correlation id is generated unless `attributes` already carries one.
    pub async fn trigger(&self, list: TaskList, mut attributes: Headers) -> Result<CorrelationId, FlowError> {
        let correlation_id = match attributes.get(CORRELATION_ID) {
            Some(id) => CorrelationId::new(id.as_str()),
            None => {
                let id = self.ids.generate_correlation_id();
                attributes.insert(CORRELATION_ID.to_string(), id.to_string());
                id
            }
        };

        let payload = list.to_json()?;
        self.channel
            .publish(&self.settings.topic, Message::new(payload).with_attributes(attributes))
            .await?;

        tracing::info!(
            pipeline = %self.settings.name,
            correlation_id = %correlation_id,
            tasks = list.len(),
            "run triggered"
        );
        self.emitter
            .emit(&correlation_id, &self.settings.action, JobState::Pending, None)
            .await;
        Ok(correlation_id)
    }

    /// Execute exactly one task of `batch` and hand the rest off.
    ///
    /// Step failures end the run through the status sink and return
    /// `Ok(Continuation::Aborted)`; `Err` is reserved for infrastructure
    /// failures (encoding or publishing the continuation).
    pub async fn run_iteration(&self, batch: Batch) -> Result<Continuation, FlowError> {
        let span = tracing::info_span!(
            "iteration",
            pipeline = %self.settings.name,
            batch_id = %batch.batch_id,
            correlation_id = tracing::field::Empty,
        );
        self.iterate(batch).instrument(span).await
    }

    async fn iterate(&self, batch: Batch) -> Result<Continuation, FlowError> {
        let Batch {
            mut task_list,
            attributes,
            ..
        } = batch;

        let Some(task) = task_list.pop_next(&self.order) else {
            // 空の TaskList での起動: 何もせず完了
            let correlation_id = attributes
                .get(CORRELATION_ID)
                .map(|id| CorrelationId::new(id.as_str()))
                .unwrap_or_else(|| self.ids.generate_correlation_id());
            tracing::Span::current().record("correlation_id", tracing::field::display(&correlation_id));
            return self
                .continuation
                .advance(&self.emitter, task_list, None, attributes, Duration::ZERO, &correlation_id)
                .await;
        };

        let mut ctx = ExecutionContext::rehydrate(task, &attributes, || self.ids.generate_correlation_id());
        let correlation_id = ctx.correlation_id().clone();
        let destination = ctx.task().destination().clone();
        tracing::Span::current().record("correlation_id", tracing::field::display(&correlation_id));

        if ctx.is_first_invocation() {
            self.emitter
                .emit(&correlation_id, destination.as_str(), JobState::Started, None)
                .await;
        }

        tracing::debug!(
            destination = %destination,
            phase = %ctx.task().phase(),
            sub_step = ctx.task().sub_step(),
            loop_counter = ctx.loop_counter(),
            remaining = task_list.len(),
            "dispatching task"
        );

        let outcome = match self.dispatcher.invoke(&destination, &mut ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // poison task を避けるため requeue しない
                tracing::error!(destination = %destination, error = %e, "step failed, aborting run");
                self.emitter
                    .emit(&correlation_id, destination.as_str(), JobState::Failed, Some(e.to_string()))
                    .await;
                return Ok(Continuation::Aborted);
            }
        };

        match self.controller.decide(outcome, ctx.loop_counter()) {
            Verdict::Finished => {
                let out = ctx.dehydrate(&self.carry);
                self.continuation
                    .advance(
                        &self.emitter,
                        task_list,
                        out.follow_up,
                        out.attributes,
                        Duration::ZERO,
                        &correlation_id,
                    )
                    .await
            }
            Verdict::Retry { loop_counter, delay } => {
                tracing::debug!(destination = %destination, loop_counter, "step rescheduled");
                let (task, attributes) = ctx.into_retry(loop_counter, &self.carry);
                task_list.add(task);
                self.continuation
                    .advance(&self.emitter, task_list, None, attributes, delay, &correlation_id)
                    .await
            }
            Verdict::TimedOut { loop_counter } => {
                tracing::warn!(
                    destination = %destination,
                    loop_counter,
                    max_retries = self.controller.policy().max_retries,
                    "retries exhausted, dropping task"
                );
                self.emitter
                    .emit(
                        &correlation_id,
                        destination.as_str(),
                        JobState::Timeout,
                        Some(format!("gave up after {loop_counter} reschedules")),
                    )
                    .await;
                // follow-up は破棄、carry 対象のヘッダだけ残す
                let attributes = ctx.dehydrate(&self.carry).attributes;
                self.continuation
                    .advance(&self.emitter, task_list, None, attributes, Duration::ZERO, &correlation_id)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::domain::{BatchId, LOOP_COUNTER, StepOutcome, Task};
    use crate::impls::{InMemoryChannel, PipelineStep, RecordingEventSink, StepRegistry};
    use crate::ports::{FixedClock, StepError, UlidGenerator};

    struct Done;

    #[async_trait]
    impl PipelineStep for Done {
        async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            Ok(StepOutcome::Done)
        }
    }

    struct Broken;

    #[async_trait]
    impl PipelineStep for Broken {
        async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            Err(StepError::failed(ctx.task().destination(), "disk full"))
        }
    }

    #[derive(Default)]
    struct Pending(AtomicUsize);

    #[async_trait]
    impl PipelineStep for Pending {
        async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome::Reschedule)
        }
    }

    /// Records the destinations it ran, in order.
    #[derive(Default)]
    struct Records(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl PipelineStep for Records {
        async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            self.0.lock().unwrap().push(ctx.task().destination().to_string());
            Ok(StepOutcome::Done)
        }
    }

    struct Fixture {
        engine: Engine,
        channel: Arc<InMemoryChannel>,
        sink: Arc<RecordingEventSink>,
    }

    fn fixture(registry: StepRegistry, retry: RetryPolicy) -> Fixture {
        let channel = Arc::new(InMemoryChannel::new());
        let sink = Arc::new(RecordingEventSink::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let engine = Engine::new(
            PipelineSettings::new("geocoder", "geocoder").with_retry(retry),
            PhaseOrder::default_geocoder(),
            CarryOver::default(),
            Arc::new(registry),
            channel.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            EventEmitter::new(sink.clone(), clock, "GEOCODER"),
        );
        Fixture { engine, channel, sink }
    }

    fn batch(tasks: Vec<Task>) -> Batch {
        let mut batch = Batch::new(BatchId::from_ulid(ulid::Ulid::nil()));
        batch.task_list = tasks.into_iter().collect();
        batch.messages = 1;
        batch
    }

    #[tokio::test]
    async fn empty_trigger_completes_immediately() {
        let f = fixture(StepRegistry::new(), RetryPolicy::default());
        let out = f.engine.run_iteration(batch(vec![])).await.unwrap();
        assert_eq!(out, Continuation::Complete);
        assert_eq!(f.sink.states().await, vec![JobState::Ok]);
        assert_eq!(f.channel.published("geocoder").await, 0);
    }

    #[tokio::test]
    async fn first_invocation_emits_started_then_requeues_rest() {
        let mut registry = StepRegistry::new();
        registry.register("osm.download", Arc::new(Done)).unwrap();
        let f = fixture(registry, RetryPolicy::default());

        let out = f
            .engine
            .run_iteration(batch(vec![
                Task::new("DOWNLOAD", "osm.download"),
                Task::new("CONVERT", "osm.convert"),
            ]))
            .await
            .unwrap();

        assert_eq!(out, Continuation::Requeued { remaining: 1, delay: Duration::ZERO });
        let events = f.sink.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, JobState::Started);
        assert_eq!(events[0].action, "osm.download");
    }

    #[tokio::test]
    async fn step_error_aborts_without_requeue() {
        let mut registry = StepRegistry::new();
        registry.register("osm.download", Arc::new(Broken)).unwrap();
        let f = fixture(registry, RetryPolicy::default());

        let out = f
            .engine
            .run_iteration(batch(vec![
                Task::new("DOWNLOAD", "osm.download"),
                Task::new("CONVERT", "osm.convert"),
            ]))
            .await
            .unwrap();

        assert_eq!(out, Continuation::Aborted);
        assert_eq!(f.sink.states().await, vec![JobState::Started, JobState::Failed]);
        let failed = &f.sink.events().await[1];
        assert!(failed.detail.as_deref().unwrap_or_default().contains("disk full"));
        assert_eq!(f.channel.published("geocoder").await, 0);
    }

    #[tokio::test]
    async fn unknown_destination_fails_the_run() {
        let f = fixture(StepRegistry::new(), RetryPolicy::default());
        let out = f
            .engine
            .run_iteration(batch(vec![Task::new("INDEX", "nowhere")]))
            .await
            .unwrap();
        assert_eq!(out, Continuation::Aborted);
        assert_eq!(f.sink.count(JobState::Failed).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_requeues_same_task_with_counter() {
        let mut registry = StepRegistry::new();
        registry.register("k8s.rollout", Arc::new(Pending::default())).unwrap();
        let f = fixture(registry, RetryPolicy::new(3, Duration::from_secs(15)));

        let task = Task::new("DEPLOY", "k8s.rollout").with_sub_step(1);
        let out = f.engine.run_iteration(batch(vec![task.clone()])).await.unwrap();
        assert_eq!(out, Continuation::Requeued { remaining: 1, delay: Duration::from_secs(15) });

        let published = f.channel.peek_all("geocoder").await;
        let list = TaskList::from_json(&published[0].payload).unwrap();
        let retried = &list.tasks()[0];
        assert!(retried.same_unit(&task));
        assert_eq!(retried.sub_step(), 1);
        assert_eq!(retried.loop_counter(), 1);
        // started task: no STARTED event
        assert!(f.sink.states().await.is_empty());
    }

    #[tokio::test]
    async fn rescheduled_poll_runs_before_merged_trigger() {
        let seen = Arc::new(Records::default());
        let mut registry = StepRegistry::new();
        registry.register("osm.download", seen.clone()).unwrap();
        registry.register("export.poll", seen.clone()).unwrap();
        let f = fixture(registry, RetryPolicy::default());

        // subStep 0, but already polled once
        let poll = Task::new("EXPORT", "export.poll").with_header(LOOP_COUNTER, "1");
        let out = f
            .engine
            .run_iteration(batch(vec![Task::new("DOWNLOAD", "osm.download"), poll]))
            .await
            .unwrap();

        assert_eq!(out, Continuation::Requeued { remaining: 1, delay: Duration::ZERO });
        assert_eq!(*seen.0.lock().unwrap(), vec!["export.poll".to_string()]);
        // re-invocation: no STARTED
        assert!(f.sink.states().await.is_empty());
    }

    #[tokio::test]
    async fn trigger_publishes_and_emits_pending() {
        let f = fixture(StepRegistry::new(), RetryPolicy::default());
        let list: TaskList = [Task::new("DOWNLOAD", "osm.download")].into_iter().collect();

        let correlation_id = f.engine.trigger(list, Headers::new()).await.unwrap();

        let published = f.channel.peek_all("geocoder").await;
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].attributes.get(CORRELATION_ID).map(String::as_str),
            Some(correlation_id.as_str())
        );
        let events = f.sink.events().await;
        assert_eq!(events[0].state, JobState::Pending);
        assert_eq!(events[0].action, "geocoder.run");
        assert_eq!(events[0].correlation_id, correlation_id);
    }
}
