//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryChannel**: 開発用の TaskChannel
//! - **StepRegistry**: destination -> PipelineStep の Dispatcher
//! - **InMemoryLeaderLock**: 単一プロセス用のリース
//! - **RecordingEventSink / TracingEventSink**
//!
//! # 本番用実装
//! ブローカー、ステータス DB、分散ロックのアダプタは別クレートに配置します。

pub mod dispatch;
pub mod event_sink;
pub mod inmem_channel;
pub mod leader_lock;

// 主要な型を再エクスポート
pub use self::dispatch::{PipelineStep, StepRegistry};
pub use self::event_sink::{RecordingEventSink, TracingEventSink};
pub use self::inmem_channel::InMemoryChannel;
pub use self::leader_lock::InMemoryLeaderLock;
