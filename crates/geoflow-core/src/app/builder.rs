//! EngineBuilder - Engine の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - channel / dispatcher / pipeline が揃っていなければ BuildError
//! - expect_destinations() で期待される destination を登録
//! - build() 時に Dispatcher::supports で全て解決できるかチェック

use std::sync::Arc;

use crate::domain::{CarryOver, Destination, PhaseOrder};
use crate::impls::TracingEventSink;
use crate::ports::{Clock, Dispatcher, EventSink, IdGenerator, SystemClock, TaskChannel, UlidGenerator};

use super::emitter::EventEmitter;
use super::engine::{Engine, PipelineSettings};

/// BuildError は Engine 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("invalid pipeline {name}: {reason}")]
    InvalidPipeline { name: String, reason: String },

    #[error("unresolved destinations: {0:?}. These destinations were expected but the dispatcher does not support them.")]
    UnsupportedDestinations(Vec<Destination>),
}

/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new()
///     .pipeline(config.pipeline("geocoder")?)
///     .phase_order(config.phase_order())
///     .dispatcher(Arc::new(registry))
///     .channel(channel)
///     .expect_destinations(["osm.download", "es.build"])
///     .build()?;
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    pipeline: Option<PipelineSettings>,
    order: Option<PhaseOrder>,
    carry: Option<CarryOver>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    channel: Option<Arc<dyn TaskChannel>>,
    sink: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    expected: Vec<Destination>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline identity and retry policy. Required.
    pub fn pipeline(mut self, settings: PipelineSettings) -> Self {
        self.pipeline = Some(settings);
        self
    }

    /// Defaults to `PhaseOrder::default_geocoder()`.
    pub fn phase_order(mut self, order: PhaseOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Header prefixes handed to follow-up tasks.
    pub fn carry_over(mut self, carry: CarryOver) -> Self {
        self.carry = Some(carry);
        self
    }

    /// Where tasks are sent by destination. Required.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Channel the pipeline topic lives on. Required.
    pub fn channel(mut self, channel: Arc<dyn TaskChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Defaults to `TracingEventSink`.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Clock for event times; `SystemClock` by default.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Id source; a ULID generator on the builder clock by default.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Destinations the dispatcher must support, checked by `build`.
    pub fn expect_destinations<I, D>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Destination>,
    {
        self.expected.extend(destinations.into_iter().map(Into::into));
        self
    }

    /// Wire the engine, failing on missing collaborators or unsupported destinations.
    pub fn build(self) -> Result<Engine, BuildError> {
        let settings = self
            .pipeline
            .ok_or(BuildError::MissingCollaborator("pipeline"))?;
        let dispatcher = self
            .dispatcher
            .ok_or(BuildError::MissingCollaborator("dispatcher"))?;
        let channel = self.channel.ok_or(BuildError::MissingCollaborator("channel"))?;

        if settings.topic.trim().is_empty() {
            return Err(BuildError::InvalidPipeline {
                name: settings.name,
                reason: "empty topic".into(),
            });
        }

        let missing: Vec<Destination> = self
            .expected
            .into_iter()
            .filter(|d| !dispatcher.supports(d))
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::UnsupportedDestinations(missing));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingEventSink));
        let emitter = EventEmitter::new(sink, clock, settings.domain.as_str());

        Ok(Engine::new(
            settings,
            self.order.unwrap_or_else(PhaseOrder::default_geocoder),
            self.carry.unwrap_or_default(),
            dispatcher,
            channel,
            ids,
            emitter,
        ))
    }
}
