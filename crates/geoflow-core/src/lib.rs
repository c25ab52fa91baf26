//! geoflow-core
//!
//! Task-queue workflow engine for the geocoder data pipeline.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Task, TaskList, PhaseOrder, ExecutionContext, RetryPolicy, JobEvent）
//! - **ports**: 抽象化レイヤー（TaskChannel, Dispatcher, EventSink, LeaderLock, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryChannel, StepRegistry, InMemoryLeaderLock など開発用）
//! - **app**: アプリケーションロジック（aggregator, engine, continuation, worker_loop, parallel, builder）
//! - **config / observability / error**: 設定、tracing、エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{EngineBuilder, EngineGroup, EngineLoop};
pub use config::GeoflowConfig;
pub use error::FlowError;
