//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてエンジンを実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: Engine の構築とワイヤリング（fail-fast）
//! - **Aggregator**: 受信メッセージのバッチ化とマージ
//! - **Engine**: 1 iteration = 1 task の実行と引き渡し
//! - **RetryController / ContinuationDriver**: reschedule と後続処理
//! - **EngineLoop / EngineGroup**: リーダー選出付きの queue ループ
//! - **ParallelRunner**: 協調的 abort 付きの並列サブパイプライン

pub mod aggregator;
pub mod builder;
pub mod continuation;
pub mod controller;
pub mod emitter;
pub mod engine;
pub mod parallel;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::aggregator::{Aggregator, AggregatorSettings, Batch};
pub use self::builder::{BuildError, EngineBuilder};
pub use self::continuation::{Continuation, ContinuationDriver};
pub use self::controller::RetryController;
pub use self::emitter::EventEmitter;
pub use self::engine::{Engine, PipelineSettings};
pub use self::parallel::{
    BranchReport, BranchResult, BuildStatus, Checkpoint, ParallelReport, ParallelRunner, ParallelStep,
    ParallelVerdict, StatusFlag, SubPipeline,
};
pub use self::worker_loop::{DrainReport, EngineGroup, EngineLoop};
