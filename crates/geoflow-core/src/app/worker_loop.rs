//! EngineLoop - queue ごとの単一コンシューマループ
//!
//! # フロー
//! 1. LeaderLock::acquire で queue のリーダーになる
//! 2. バッチごとに LeaderLock::renew（失敗したら消費を止めて再取得へ）
//! 3. Aggregator::next_batch でメッセージをまとめる
//! 4. Engine::run_iteration（実行中も lease_ttl / 3 ごとに renew）
//!
//! Shutdown only stops taking new batches. An iteration that already started
//! runs to the end. Retry delays are held by the channel, so an iteration
//! never waits one out and a stopped loop leaves its run on the channel.
//!
//! # 学習ポイント
//! - watch channel による協調的 shutdown
//! - tokio::select! で作業と lease 更新を並行させる（作業側はキャンセルしない）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::FlowError;
use crate::ports::LeaderLock;

use super::aggregator::{Aggregator, AggregatorSettings, Batch};
use super::continuation::Continuation;
use super::engine::Engine;

/// Result of `EngineLoop::drain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub iterations: usize,
    pub last: Option<Continuation>,
}

/// Single consumer of one pipeline topic, guarded by a leader lease.
pub struct EngineLoop {
    engine: Arc<Engine>,
    aggregator: Aggregator,
    lock: Arc<dyn LeaderLock>,
    holder: String,
    lease_retry: Duration,
}

impl EngineLoop {
    /// Loop over `engine`'s topic. `holder` names this replica to `lock`;
    /// `lease_retry` is the pause after a refused or failed acquire.
    pub fn new(
        engine: Arc<Engine>,
        settings: AggregatorSettings,
        lock: Arc<dyn LeaderLock>,
        holder: impl Into<String>,
        lease_retry: Duration,
    ) -> Self {
        let aggregator = Aggregator::new(
            Arc::clone(engine.channel()),
            engine.topic(),
            settings,
            Arc::clone(engine.ids()),
        );
        Self {
            engine,
            aggregator,
            lock,
            holder: holder.into(),
            lease_retry,
        }
    }

    /// The engine this loop drives.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn queue(&self) -> &str {
        self.engine.topic()
    }

    fn renew_every(&self) -> Duration {
        (self.lock.lease_ttl() / 3).max(Duration::from_millis(1))
    }

    /// Consume until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), FlowError> {
        let queue = self.queue().to_string();
        let mut leader = false;

        loop {
            // shutdown が来ていたら抜ける
            if *shutdown.borrow() {
                break;
            }

            if !leader {
                match self.lock.acquire(&queue, &self.holder).await {
                    Ok(true) => {
                        tracing::info!(queue = %queue, holder = %self.holder, "acquired leadership");
                        leader = true;
                    }
                    Ok(false) => {
                        tracing::debug!(queue = %queue, "another replica is leading");
                        self.pause(&mut shutdown).await;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(queue = %queue, error = %e, "leader lock unavailable");
                        self.pause(&mut shutdown).await;
                        continue;
                    }
                }
            } else if !self.renew(&queue).await {
                leader = false;
                continue;
            }

            // next_batch は途中でキャンセルしない（受信済みメッセージを失うため）
            match self.aggregator.next_batch().await {
                Ok(Some(batch)) => {
                    let (result, holding) = self.with_lease(&queue, self.process(batch)).await;
                    match result {
                        Ok(Some(continuation)) if continuation.is_terminal() => {
                            tracing::info!(queue = %queue, continuation = ?continuation, "run finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(queue = %queue, error = %e, "iteration failed"),
                    }
                    leader = holding;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(queue = %queue, error = %e, "receive failed");
                    self.pause(&mut shutdown).await;
                }
            }
        }

        if leader && let Err(e) = self.lock.release(&queue, &self.holder).await {
            tracing::warn!(queue = %queue, error = %e, "failed to release leadership");
        }
        tracing::info!(queue = %queue, "engine loop stopped");
        Ok(())
    }

    /// Process batches until the queue stays idle for one poll.
    ///
    /// After a delayed requeue the idle wait grows by that delay, so a run
    /// that only waits on its retry timer is drained as well. Fails with
    /// `FlowError::NotLeader` when another replica holds the queue or the
    /// lease is lost midway.
    pub async fn drain(&self) -> Result<DrainReport, FlowError> {
        let queue = self.queue().to_string();
        if !self.lock.acquire(&queue, &self.holder).await? {
            return Err(FlowError::NotLeader(queue));
        }

        let result = self.drain_batches(&queue).await;

        if let Err(e) = self.lock.release(&queue, &self.holder).await {
            tracing::warn!(queue = %queue, error = %e, "failed to release leadership");
        }
        result
    }

    async fn drain_batches(&self, queue: &str) -> Result<DrainReport, FlowError> {
        let idle_poll = self.aggregator.settings().idle_poll;
        let mut report = DrainReport {
            iterations: 0,
            last: None,
        };
        let mut wait = idle_poll;

        loop {
            let (batch, polled) = self
                .with_lease(queue, self.aggregator.next_batch_within(wait))
                .await;
            let Some(batch) = batch? else {
                if !polled {
                    return Err(FlowError::NotLeader(queue.to_string()));
                }
                break;
            };

            // 受信済みのバッチは lease を失っていても最後まで処理する
            let (continuation, processed) = self.with_lease(queue, self.process(batch)).await;
            let continuation = continuation?;
            wait = match &continuation {
                Some(Continuation::Requeued { delay, .. }) => idle_poll + *delay,
                _ => idle_poll,
            };
            if let Some(continuation) = continuation {
                report.iterations += 1;
                report.last = Some(continuation);
            }
            if !(polled && processed) {
                return Err(FlowError::NotLeader(queue.to_string()));
            }
        }

        tracing::info!(queue = %queue, iterations = report.iterations, "queue drained");
        Ok(report)
    }

    async fn process(&self, batch: Batch) -> Result<Option<Continuation>, FlowError> {
        if batch.is_rejected_only() {
            tracing::warn!(batch_id = %batch.batch_id, rejected = batch.rejected, "batch had no task lists");
            return Ok(None);
        }
        self.engine.run_iteration(batch).await.map(Some)
    }

    /// Renew the lease; `false` when it is no longer held.
    async fn renew(&self, queue: &str) -> bool {
        match self.lock.renew(queue, &self.holder).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(queue = %queue, "lost leadership, pausing consumption");
                false
            }
            Err(e) => {
                tracing::warn!(queue = %queue, error = %e, "lease renewal failed, pausing consumption");
                false
            }
        }
    }

    /// Drive `work` to the end while renewing the lease every third of its
    /// ttl. `work` is never cancelled; the flag says whether the lease was
    /// held throughout.
    async fn with_lease<F>(&self, queue: &str, work: F) -> (F::Output, bool)
    where
        F: Future,
    {
        tokio::pin!(work);
        let mut ticker = tokio::time::interval(self.renew_every());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 最初の tick は即座に完了する
        ticker.tick().await;

        let mut holding = true;
        loop {
            tokio::select! {
                output = &mut work => return (output, holding),
                _ = ticker.tick(), if holding => {
                    holding = self.renew(queue).await;
                }
            }
        }
    }

    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(self.lease_retry) => {}
        }
    }
}

/// Engine loop group handle.
/// - `shutdown_and_join()` で全ループの終了を待てる
pub struct EngineGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<(String, JoinHandle<Result<(), FlowError>>)>,
}

impl EngineGroup {
    /// Spawn every loop on the runtime, sharing one shutdown signal.
    pub fn spawn(loops: Vec<EngineLoop>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = loops
            .into_iter()
            .map(|engine_loop| {
                let name = engine_loop.engine().settings().name.clone();
                let rx = shutdown_rx.clone();
                let join = tokio::spawn(async move { engine_loop.run(rx).await });
                (name, join)
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    /// Number of spawned loops.
    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new batches. In-flight iterations are not cancelled.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Request shutdown and wait for every loop to stop.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for (name, join) in self.joins {
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(pipeline = %name, error = %e, "engine loop failed"),
                Err(e) => tracing::error!(pipeline = %name, error = %e, "engine loop panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::app::builder::EngineBuilder;
    use crate::app::engine::PipelineSettings;
    use crate::domain::{ExecutionContext, Headers, JobState, RetryPolicy, StepOutcome, Task, TaskList};
    use crate::impls::{InMemoryChannel, InMemoryLeaderLock, PipelineStep, RecordingEventSink, StepRegistry};
    use crate::ports::{FixedClock, StepError, TaskChannel};

    #[derive(Default)]
    struct CountingDone(AtomicUsize);

    #[async_trait]
    impl PipelineStep for CountingDone {
        async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome::Done)
        }
    }

    #[derive(Default)]
    struct AlwaysPending(AtomicUsize);

    #[async_trait]
    impl PipelineStep for AlwaysPending {
        async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome::Reschedule)
        }
    }

    /// Writes `X=1` and schedules `B`.
    struct ProducesFollowUp;

    #[async_trait]
    impl PipelineStep for ProducesFollowUp {
        async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            ctx.set_header("X", "1");
            ctx.schedule_follow_up(Task::new("CONVERT", "B"));
            Ok(StepOutcome::Done)
        }
    }

    /// Records the `X` header it saw, per destination.
    #[derive(Default)]
    struct SeesHeader(StdMutex<Vec<(String, Option<String>)>>);

    #[async_trait]
    impl PipelineStep for SeesHeader {
        async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            let seen = (ctx.task().destination().to_string(), ctx.header("X").map(str::to_string));
            self.0.lock().unwrap().push(seen);
            Ok(StepOutcome::Done)
        }
    }

    /// Reschedules until it has run `ready_after` times, recording the loop
    /// counter it saw each time.
    struct PollsUntil {
        ready_after: u32,
        seen: StdMutex<Vec<u32>>,
    }

    impl PollsUntil {
        fn new(ready_after: u32) -> Self {
            Self {
                ready_after,
                seen: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PipelineStep for PollsUntil {
        async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            let loop_counter = ctx.loop_counter();
            self.seen.lock().unwrap().push(loop_counter);
            if loop_counter + 1 >= self.ready_after {
                Ok(StepOutcome::Done)
            } else {
                Ok(StepOutcome::Reschedule)
            }
        }
    }

    /// Long-running step, e.g. an index build.
    struct Slow(Duration);

    #[async_trait]
    impl PipelineStep for Slow {
        async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
            tokio::time::sleep(self.0).await;
            Ok(StepOutcome::Done)
        }
    }

    fn engine_on(
        settings: PipelineSettings,
        registry: StepRegistry,
        channel: Arc<InMemoryChannel>,
        sink: Arc<RecordingEventSink>,
    ) -> Arc<Engine> {
        let engine = EngineBuilder::new()
            .pipeline(settings)
            .dispatcher(Arc::new(registry))
            .channel(channel)
            .event_sink(sink)
            .clock(Arc::new(FixedClock::new(Utc::now())))
            .build()
            .unwrap();
        Arc::new(engine)
    }

    struct Harness {
        engine_loop: EngineLoop,
        channel: Arc<InMemoryChannel>,
        sink: Arc<RecordingEventSink>,
        lock: Arc<InMemoryLeaderLock>,
    }

    fn harness(registry: StepRegistry, retry: RetryPolicy) -> Harness {
        let channel = Arc::new(InMemoryChannel::new());
        let sink = Arc::new(RecordingEventSink::new());
        let lock = Arc::new(InMemoryLeaderLock::new(Duration::from_secs(30)));
        let engine = EngineBuilder::new()
            .pipeline(PipelineSettings::new("geocoder", "geocoder").with_retry(retry))
            .dispatcher(Arc::new(registry))
            .channel(channel.clone())
            .event_sink(sink.clone())
            .clock(Arc::new(FixedClock::new(Utc::now())))
            .build()
            .unwrap();
        let engine_loop = EngineLoop::new(
            Arc::new(engine),
            AggregatorSettings::default(),
            lock.clone(),
            "replica-a",
            Duration::from_secs(5),
        );
        Harness {
            engine_loop,
            channel,
            sink,
            lock,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retry_invokes_initial_plus_max_retries() {
        let step = Arc::new(AlwaysPending::default());
        let mut registry = StepRegistry::new();
        registry.register("k8s.rollout", step.clone()).unwrap();
        let h = harness(registry, RetryPolicy::new(3, Duration::from_millis(15_000)));

        let list: TaskList = [Task::new("DEPLOY", "k8s.rollout")].into_iter().collect();
        h.engine_loop.engine().trigger(list, Headers::new()).await.unwrap();

        let report = h.engine_loop.drain().await.unwrap();

        assert_eq!(step.0.load(Ordering::SeqCst), 4);
        assert_eq!(report.iterations, 4);
        assert_eq!(h.sink.count(JobState::Timeout).await, 1);
        // dropped task leaves an empty list: the run completes
        assert_eq!(report.last, Some(Continuation::Complete));
        assert_eq!(
            h.sink.states().await,
            vec![JobState::Pending, JobState::Started, JobState::Timeout, JobState::Ok]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn independent_tasks_drain_one_per_iteration() {
        const N: usize = 5;
        let step = Arc::new(CountingDone::default());
        let mut registry = StepRegistry::new();
        let mut tasks = Vec::new();
        for i in 0..N {
            let dest = format!("dest-{i}");
            registry.register(dest.as_str(), step.clone()).unwrap();
            tasks.push(Task::new("DOWNLOAD", dest.as_str()));
        }
        let h = harness(registry, RetryPolicy::default());

        h.engine_loop
            .engine()
            .trigger(tasks.into_iter().collect(), Headers::new())
            .await
            .unwrap();
        let report = h.engine_loop.drain().await.unwrap();

        assert_eq!(report.iterations, N);
        assert_eq!(step.0.load(Ordering::SeqCst), N);
        assert_eq!(h.sink.count(JobState::Ok).await, 1);
        // trigger + one requeue per iteration except the last
        assert_eq!(h.channel.published("geocoder").await, N);
        assert_eq!(h.channel.pending("geocoder").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn follow_up_sees_headers_but_queued_task_does_not() {
        let seer = Arc::new(SeesHeader::default());
        let mut registry = StepRegistry::new();
        registry.register("A", Arc::new(ProducesFollowUp)).unwrap();
        registry.register("B", seer.clone()).unwrap();
        registry.register("C", seer.clone()).unwrap();
        let h = harness(registry, RetryPolicy::default());

        // C is queued before A runs; B only exists as A's follow-up
        let list: TaskList = [Task::new("DOWNLOAD", "A"), Task::new("DEPLOY", "C")]
            .into_iter()
            .collect();
        h.engine_loop.engine().trigger(list, Headers::new()).await.unwrap();
        h.engine_loop.drain().await.unwrap();

        let seen = seer.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![("B".to_string(), Some("1".to_string())), ("C".to_string(), None)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unparsable_messages_do_not_start_a_run() {
        let h = harness(StepRegistry::new(), RetryPolicy::default());
        h.channel
            .publish("geocoder", crate::ports::Message::new("garbage"))
            .await
            .unwrap();

        let report = h.engine_loop.drain().await.unwrap();
        assert_eq!(report.iterations, 0);
        assert!(h.sink.events().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_refuses_when_another_replica_leads() {
        let h = harness(StepRegistry::new(), RetryPolicy::default());
        assert!(h.lock.acquire("geocoder", "replica-b").await.unwrap());

        let err = h.engine_loop.drain().await.unwrap_err();
        assert!(matches!(err, FlowError::NotLeader(q) if q == "geocoder"));
    }

    #[tokio::test(start_paused = true)]
    async fn group_runs_until_shutdown_and_releases_lock() {
        let step = Arc::new(CountingDone::default());
        let mut registry = StepRegistry::new();
        registry.register("osm.download", step.clone()).unwrap();
        let h = harness(registry, RetryPolicy::default());
        let engine = Arc::clone(h.engine_loop.engine());

        let group = EngineGroup::spawn(vec![h.engine_loop]);
        assert_eq!(group.len(), 1);

        let list: TaskList = [Task::new("DOWNLOAD", "osm.download")].into_iter().collect();
        engine.trigger(list, Headers::new()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.lock.holder("geocoder").await.as_deref(), Some("replica-a"));
        group.shutdown_and_join().await;

        assert_eq!(step.0.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.count(JobState::Ok).await, 1);
        assert!(h.lock.holder("geocoder").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_loop_leaves_run_on_channel_for_next_replica() {
        let step = Arc::new(PollsUntil::new(3));
        let mut registry = StepRegistry::new();
        registry.register("k8s.rollout", step.clone()).unwrap();
        let h = harness(registry, RetryPolicy::new(600, Duration::from_secs(15)));
        let engine = Arc::clone(h.engine_loop.engine());

        let list: TaskList = [Task::new("DEPLOY", "k8s.rollout")].into_iter().collect();
        engine.trigger(list, Headers::new()).await.unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let first = h.engine_loop;
        let killed = tokio::spawn(async move { first.run(shutdown_rx).await });
        // first poll done, retry delay running
        tokio::time::sleep(Duration::from_secs(5)).await;
        killed.abort();
        assert!(killed.await.unwrap_err().is_cancelled());

        assert_eq!(*step.seen.lock().unwrap(), vec![0]);
        assert_eq!(h.channel.pending("geocoder").await, 1);

        // replica-a's lease runs out, replica-b picks the run up
        tokio::time::sleep(Duration::from_secs(40)).await;
        let resumed = EngineLoop::new(
            engine,
            AggregatorSettings::default(),
            h.lock.clone(),
            "replica-b",
            Duration::from_secs(5),
        );
        let report = resumed.drain().await.unwrap();

        assert_eq!(*step.seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(report.last, Some(Continuation::Complete));
        assert_eq!(
            h.sink.states().await,
            vec![JobState::Pending, JobState::Started, JobState::Ok]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lease_is_renewed_while_an_iteration_runs() {
        let mut registry = StepRegistry::new();
        registry
            .register("es.build", Arc::new(Slow(Duration::from_secs(45))))
            .unwrap();
        let h = harness(registry, RetryPolicy::default());
        let engine = Arc::clone(h.engine_loop.engine());

        let list: TaskList = [Task::new("INDEX", "es.build")].into_iter().collect();
        engine.trigger(list, Headers::new()).await.unwrap();
        let group = EngineGroup::spawn(vec![h.engine_loop]);

        // past the 30 s ttl, build still running
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(!h.lock.acquire("geocoder", "replica-b").await.unwrap());
        assert_eq!(h.lock.holder("geocoder").await.as_deref(), Some("replica-a"));

        group.shutdown_and_join().await;
        assert_eq!(h.sink.count(JobState::Ok).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_on_one_queue_does_not_stall_another() {
        let channel = Arc::new(InMemoryChannel::new());
        let lock = Arc::new(InMemoryLeaderLock::new(Duration::from_secs(30)));

        let poller = Arc::new(AlwaysPending::default());
        let mut geocoder_steps = StepRegistry::new();
        geocoder_steps.register("k8s.rollout", poller.clone()).unwrap();
        let geocoder_sink = Arc::new(RecordingEventSink::new());
        let geocoder = engine_on(
            PipelineSettings::new("geocoder", "geocoder")
                .with_retry(RetryPolicy::new(600, Duration::from_secs(300))),
            geocoder_steps,
            channel.clone(),
            geocoder_sink.clone(),
        );

        let done = Arc::new(CountingDone::default());
        let mut export_steps = StepRegistry::new();
        export_steps.register("export.start", done.clone()).unwrap();
        export_steps.register("export.poll", done.clone()).unwrap();
        let export_sink = Arc::new(RecordingEventSink::new());
        let export = engine_on(
            PipelineSettings::new("export", "geocoder-export"),
            export_steps,
            channel.clone(),
            export_sink.clone(),
        );

        let rollout: TaskList = [Task::new("DEPLOY", "k8s.rollout")].into_iter().collect();
        geocoder.trigger(rollout, Headers::new()).await.unwrap();

        let loops = [&geocoder, &export]
            .into_iter()
            .map(|engine| {
                EngineLoop::new(
                    Arc::clone(engine),
                    AggregatorSettings::default(),
                    lock.clone(),
                    "replica-a",
                    Duration::from_secs(5),
                )
            })
            .collect();
        let group = EngineGroup::spawn(loops);

        // geocoder is now waiting out its 300 s retry delay
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(channel.scheduled("geocoder").await, 1);

        let job: TaskList = [Task::new("EXPORT", "export.start"), Task::new("EXPORT", "export.poll")]
            .into_iter()
            .collect();
        export.trigger(job, Headers::new()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(done.0.load(Ordering::SeqCst), 2);
        assert_eq!(export_sink.count(JobState::Ok).await, 1);
        assert_eq!(poller.0.load(Ordering::SeqCst), 1);
        assert_eq!(geocoder_sink.count(JobState::Ok).await, 0);

        group.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn follower_waits_for_leader() {
        let h = harness(StepRegistry::new(), RetryPolicy::default());
        assert!(h.lock.acquire("geocoder", "replica-b").await.unwrap());

        let group = EngineGroup::spawn(vec![h.engine_loop]);
        h.channel
            .publish("geocoder", crate::ports::Message::new(r#"{"tasks":[]}"#))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        // nothing consumed while replica-b holds the lease
        assert_eq!(h.channel.pending("geocoder").await, 1);
        group.shutdown_and_join().await;
    }
}
