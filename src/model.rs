use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current version of the `summary.json` schema.
pub const SUMMARY_VERSION: u32 = 1;

/// Immutable request for one review-queue run. Serialized as `config.json`
/// inside the job directory so history reconstruction can recover the
/// stage flags later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueueConfig {
    pub workspace: PathBuf,
    pub prompts: Vec<String>,
    pub aggregate_prompt: String,
    pub fix_prompt: String,
    pub run_aggregate: bool,
    pub run_fix: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub full_auto: bool,
    #[serde(default)]
    pub skip_repo_check: bool,
    #[serde(default)]
    pub ephemeral: bool,
}

impl ReviewQueueConfig {
    /// Prompts with surrounding whitespace stripped and blank entries removed.
    /// Worker count is the length of this list.
    pub fn trimmed_prompts(&self) -> Vec<String> {
        self.prompts
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Completed | WorkerStatus::Failed)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Pending => write!(f, "pending"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Completed => write!(f, "completed"),
            WorkerStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-prompt worker record. Created `pending` when the run starts and
/// written only by the worker that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewWorkerResult {
    pub id: u32,
    pub prompt: String,
    pub status: WorkerStatus,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub stdout_path: Option<PathBuf>,
    #[serde(default)]
    pub stderr_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ReviewWorkerResult {
    pub fn pending(id: u32, prompt: String) -> Self {
        Self {
            id,
            prompt,
            status: WorkerStatus::Pending,
            output_path: None,
            stdout_path: None,
            stderr_path: None,
            error: None,
        }
    }
}

/// Run-level phase. Advanced only through `can_transition`-legal edges by
/// the orchestrator; `failed` and `cancelled` are reachable from any
/// non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewQueuePhase {
    Idle,
    Preparing,
    Reviewing,
    Aggregating,
    Fixing,
    Completed,
    Failed,
    Cancelled,
}

impl ReviewQueuePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReviewQueuePhase::Completed | ReviewQueuePhase::Failed | ReviewQueuePhase::Cancelled
        )
    }

    /// Legal phase transitions.
    pub fn can_transition(&self, next: ReviewQueuePhase) -> bool {
        use ReviewQueuePhase::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Preparing)
                | (Preparing, Reviewing)
                | (Reviewing, Aggregating)
                | (Reviewing, Completed)
                | (Aggregating, Fixing)
                | (Aggregating, Completed)
                | (Fixing, Completed)
        )
    }
}

impl fmt::Display for ReviewQueuePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewQueuePhase::Idle => write!(f, "idle"),
            ReviewQueuePhase::Preparing => write!(f, "preparing"),
            ReviewQueuePhase::Reviewing => write!(f, "reviewing"),
            ReviewQueuePhase::Aggregating => write!(f, "aggregating"),
            ReviewQueuePhase::Fixing => write!(f, "fixing"),
            ReviewQueuePhase::Completed => write!(f, "completed"),
            ReviewQueuePhase::Failed => write!(f, "failed"),
            ReviewQueuePhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal summary returned from a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewQueueResult {
    pub job_id: String,
    pub job_dir: PathBuf,
    pub workers: Vec<ReviewWorkerResult>,
    pub aggregate_path: Option<PathBuf>,
    pub fix_path: Option<PathBuf>,
    pub completed: usize,
    pub failed: usize,
}

/// Durable job metadata written best-effort as `summary.json` at run end.
/// The preferred source for history reconstruction; its absence must not
/// prevent a job directory from being listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueueJobSummary {
    pub version: u32,
    pub job_id: String,
    pub job_dir: PathBuf,
    pub phase: ReviewQueuePhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub worker_count: usize,
    pub completed: usize,
    pub failed: usize,
    pub workers: Vec<ReviewWorkerResult>,
    #[serde(default)]
    pub aggregate_path: Option<PathBuf>,
    #[serde(default)]
    pub fix_path: Option<PathBuf>,
    pub run_aggregate: bool,
    pub run_fix: bool,
    #[serde(default)]
    pub model: Option<String>,
}

/// Read-only view of a past job, reconstructed from `summary.json` when
/// present or inferred from whatever files remain on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewQueueHistoryItem {
    pub job_id: String,
    pub job_dir: PathBuf,
    pub phase: ReviewQueuePhase,
    pub created_at: Option<DateTime<Utc>>,
    pub worker_count: usize,
    pub failed: usize,
    pub aggregate_path: Option<PathBuf>,
    pub fix_path: Option<PathBuf>,
    pub run_aggregate: bool,
    pub run_fix: bool,
    pub model: Option<String>,
}
