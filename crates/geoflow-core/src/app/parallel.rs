//! ParallelRunner - 協調的キャンセル付きの並列サブパイプライン
//!
//! All branches share one `BuildStatus` flag. A branch that hits an
//! unrecoverable validation failure flips it to `ABORT` (compare-and-swap,
//! first writer wins) and stops. Every branch checks the flag at each
//! checkpoint and returns quietly once it sees `ABORT`.
//!
//! Cancellation is cooperative: a branch in the middle of an external call
//! finishes that call and only stops at its next checkpoint. Abort latency is
//! therefore bounded by the longest unit of work between two checkpoints, not
//! zero.
//!
//! # 学習ポイント
//! - AtomicU8 + compare_exchange による 1 回だけの状態遷移
//! - JoinSet で branch を並行実行し、panic も結果として回収する

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::domain::{ExecutionContext, StepOutcome};
use crate::impls::PipelineStep;
use crate::ports::StepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BuildStatus {
    Building = 0,
    Abort = 1,
}

/// Shared `BUILDING | ABORT` flag for one parallel run.
#[derive(Debug)]
pub struct StatusFlag(AtomicU8);

impl StatusFlag {
    pub fn new() -> Self {
        Self(AtomicU8::new(BuildStatus::Building as u8))
    }

    /// Current status.
    pub fn status(&self) -> BuildStatus {
        match self.0.load(Ordering::Acquire) {
            0 => BuildStatus::Building,
            _ => BuildStatus::Abort,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.status() == BuildStatus::Abort
    }

    /// Set `ABORT`. Returns `true` only for the call that made the transition.
    pub fn abort(&self) -> bool {
        self.0
            .compare_exchange(
                BuildStatus::Building as u8,
                BuildStatus::Abort as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for StatusFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// A branch's view of the shared flag.
#[derive(Debug)]
pub struct Checkpoint {
    branch: String,
    flag: Arc<StatusFlag>,
    passed: AtomicUsize,
    observed_abort: AtomicBool,
}

impl Checkpoint {
    /// Checkpoint of `branch`, sharing `flag` with its siblings.
    pub fn new(branch: impl Into<String>, flag: Arc<StatusFlag>) -> Self {
        Self {
            branch: branch.into(),
            flag,
            passed: AtomicUsize::new(0),
            observed_abort: AtomicBool::new(false),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Call after each unit of work. `false` means the run was aborted and
    /// the branch must stop without further external writes.
    pub fn proceed(&self) -> bool {
        if self.flag.is_aborted() {
            if !self.observed_abort.swap(true, Ordering::AcqRel) {
                tracing::debug!(branch = %self.branch, "branch observed abort");
            }
            return false;
        }
        self.passed.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Signal an unrecoverable failure to every branch.
    pub fn abort(&self, reason: &str) -> bool {
        let first = self.flag.abort();
        if first {
            tracing::warn!(branch = %self.branch, reason, "aborting parallel run");
        }
        first
    }

    /// Checkpoints this branch passed while the run was still building.
    pub fn passed(&self) -> usize {
        self.passed.load(Ordering::Acquire)
    }

    /// Whether `proceed` has returned `false` on this checkpoint.
    pub fn observed_abort(&self) -> bool {
        self.observed_abort.load(Ordering::Acquire)
    }
}

/// One independent branch (admin units, addresses, place names, ...).
#[async_trait]
pub trait SubPipeline: Send + Sync {
    fn name(&self) -> &str;

    /// Run to completion, checking `checkpoint.proceed()` after every unit.
    /// Returning `Err` counts as a validation failure and aborts the run.
    async fn run(&self, checkpoint: &Checkpoint) -> Result<(), StepError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelVerdict {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchResult {
    Completed,

    /// Returned after observing `ABORT`.
    Stopped,

    Failed(String),
    Panicked,
}

#[derive(Debug, Clone)]
pub struct BranchReport {
    pub name: String,
    pub result: BranchResult,
    pub checkpoints: usize,
}

#[derive(Debug, Clone)]
pub struct ParallelReport {
    pub verdict: ParallelVerdict,

    /// In registration order.
    pub branches: Vec<BranchReport>,
}

impl ParallelReport {
    /// Failure reasons of failed and panicked branches, in branch order.
    pub fn failures(&self) -> Vec<String> {
        self.branches
            .iter()
            .filter_map(|b| match &b.result {
                BranchResult::Failed(msg) => Some(format!("{}: {msg}", b.name)),
                BranchResult::Panicked => Some(format!("{}: panicked", b.name)),
                _ => None,
            })
            .collect()
    }
}

#[derive(Default, Clone)]
pub struct ParallelRunner {
    branches: Vec<Arc<dyn SubPipeline>>,
}

impl ParallelRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a branch; all branches start together.
    pub fn branch(mut self, branch: Arc<dyn SubPipeline>) -> Self {
        self.branches.push(branch);
        self
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Launch every branch and wait for all of them to finish.
    pub async fn run(&self) -> ParallelReport {
        let flag = Arc::new(StatusFlag::new());
        let checkpoints: Vec<Arc<Checkpoint>> = self
            .branches
            .iter()
            .map(|b| Arc::new(Checkpoint::new(b.name(), Arc::clone(&flag))))
            .collect();

        let mut set = JoinSet::new();
        for (idx, branch) in self.branches.iter().enumerate() {
            let branch = Arc::clone(branch);
            let checkpoint = Arc::clone(&checkpoints[idx]);
            set.spawn(async move { (idx, branch.run(&checkpoint).await) });
        }

        // panic したブランチは結果が None のまま残る
        let mut results: Vec<Option<BranchResult>> = vec![None; self.branches.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, Ok(()))) => {
                    results[idx] = Some(if checkpoints[idx].observed_abort() {
                        BranchResult::Stopped
                    } else {
                        BranchResult::Completed
                    });
                }
                Ok((idx, Err(e))) => {
                    flag.abort();
                    results[idx] = Some(BranchResult::Failed(e.to_string()));
                }
                Err(join_err) => {
                    flag.abort();
                    tracing::error!(error = %join_err, "parallel branch panicked");
                }
            }
        }

        let verdict = if flag.is_aborted() {
            ParallelVerdict::Failed
        } else {
            ParallelVerdict::Ok
        };

        let branches = self
            .branches
            .iter()
            .zip(results)
            .zip(&checkpoints)
            .map(|((branch, result), checkpoint)| BranchReport {
                name: branch.name().to_string(),
                result: result.unwrap_or(BranchResult::Panicked),
                checkpoints: checkpoint.passed(),
            })
            .collect();

        tracing::info!(verdict = ?verdict, "parallel run finished");
        ParallelReport { verdict, branches }
    }
}

/// Runs a `ParallelRunner` as one pipeline step. `FAILED` aborts the run.
pub struct ParallelStep {
    runner: ParallelRunner,
}

impl ParallelStep {
    /// Step running `runner` to completion on every invocation.
    pub fn new(runner: ParallelRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PipelineStep for ParallelStep {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<StepOutcome, StepError> {
        let report = self.runner.run().await;
        match report.verdict {
            ParallelVerdict::Ok => Ok(StepOutcome::Done),
            ParallelVerdict::Failed => Err(StepError::Validation {
                destination: ctx.task().destination().clone(),
                message: report.failures().join("; "),
            }),
        }
    }
}
