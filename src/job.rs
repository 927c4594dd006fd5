use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use crate::error::Result;
use crate::model::{ReviewQueueConfig, ReviewQueueJobSummary};

pub const CACHE_ROOT: &str = ".runtime-cache";
pub const QUEUE_DIR: &str = "review-queue";
pub const CONFIG_FILE: &str = "config.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const AGGREGATE_FILE: &str = "aggregate.md";
pub const FIX_FILE: &str = "fix.md";

const JOB_ID_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Root directory holding all job directories for a workspace.
pub fn queue_root(workspace: &Path) -> PathBuf {
    workspace.join(CACHE_ROOT).join(QUEUE_DIR)
}

/// Generate a sortable, collision-resistant job id: a second-precision
/// local timestamp (lexicographic order matches chronological order)
/// plus a short random suffix.
pub fn generate_job_id() -> String {
    let stamp = Local::now().format(JOB_ID_TIME_FORMAT);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &suffix[..6])
}

/// Parse the embedded timestamp prefix of a job id. Returns `None` for ids
/// without a well-formed `YYYYMMDD-HHMMSS` prefix.
pub fn parse_job_timestamp(job_id: &str) -> Option<DateTime<Utc>> {
    let prefix = job_id.get(..15)?;
    let naive = NaiveDateTime::parse_from_str(prefix, JOB_ID_TIME_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Anchor for all artifact files of one run. Each run owns exactly one job
/// directory; no two runs ever share one.
#[derive(Debug, Clone)]
pub struct JobDir {
    id: String,
    path: PathBuf,
}

impl JobDir {
    /// Create the job directory under the workspace. Safe to call twice
    /// for the same id: existing files are left untouched.
    pub fn create(workspace: &Path, id: &str) -> Result<Self> {
        let path = queue_root(workspace).join(id);
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            id: id.to_string(),
            path,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn worker_output_path(&self, worker_id: u32) -> PathBuf {
        self.path.join(format!("worker-{worker_id:02}.md"))
    }

    pub fn worker_stdout_path(&self, worker_id: u32) -> PathBuf {
        self.path.join(format!("worker-{worker_id:02}.stdout.log"))
    }

    pub fn worker_stderr_path(&self, worker_id: u32) -> PathBuf {
        self.path.join(format!("worker-{worker_id:02}.stderr.log"))
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.path.join(AGGREGATE_FILE)
    }

    pub fn fix_path(&self) -> PathBuf {
        self.path.join(FIX_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join(CONFIG_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path.join(SUMMARY_FILE)
    }

    /// Persist the run configuration as `config.json`.
    pub fn write_config(&self, config: &ReviewQueueConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_path(), json)?;
        Ok(())
    }

    /// Write `summary.json` best-effort: failures are logged, never fatal.
    pub fn write_summary(&self, summary: &ReviewQueueJobSummary) {
        let json = match serde_json::to_string_pretty(summary) {
            Ok(json) => json,
            Err(e) => {
                warn!(job_id = self.id, error = %e, "failed to serialize job summary");
                return;
            }
        };
        if let Err(e) = std::fs::write(self.summary_path(), json) {
            warn!(job_id = self.id, error = %e, "failed to write job summary");
        }
    }
}
