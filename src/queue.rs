use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::extract::extract_final_message;
use crate::job::{JobDir, generate_job_id, parse_job_timestamp};
use crate::model::{
    ReviewQueueConfig, ReviewQueueJobSummary, ReviewQueuePhase, ReviewQueueResult,
    ReviewWorkerResult, SUMMARY_VERSION, WorkerStatus,
};
use crate::tool::{ExecOutcome, ExecRequest, ToolInvoker};

/// Per-review-worker subprocess timeout.
pub const REVIEW_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Aggregate stage timeout. Longer than a single worker since it digests
/// all worker outputs.
pub const AGGREGATE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Fix stage timeout. Longest of the three, fixes may touch the codebase.
pub const FIX_TIMEOUT: Duration = Duration::from_secs(45 * 60);

/// Default cap on concurrently running review workers.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

const NO_OUTPUT_PLACEHOLDER: &str = "(no output captured)";

/// Observer for structured queue progress events. Delivered in causal
/// order: phase changes bracket their stage's worker/output events.
pub trait QueueReporter: Send + Sync {
    fn phase_changed(&self, phase: ReviewQueuePhase);
    fn worker_updated(&self, worker: &ReviewWorkerResult);
    fn aggregate_ready(&self, path: &Path);
    fn fix_ready(&self, path: &Path);
    fn run_failed(&self, message: &str);
}

/// Default reporter that prints to stderr.
pub struct StderrReporter;

impl QueueReporter for StderrReporter {
    fn phase_changed(&self, phase: ReviewQueuePhase) {
        eprintln!("[revq] phase: {phase}");
    }

    fn worker_updated(&self, worker: &ReviewWorkerResult) {
        eprintln!("[revq] worker {:02}: {}", worker.id, worker.status);
    }

    fn aggregate_ready(&self, path: &Path) {
        eprintln!("[revq] aggregate ready: {}", path.display());
    }

    fn fix_ready(&self, path: &Path) {
        eprintln!("[revq] fix report ready: {}", path.display());
    }

    fn run_failed(&self, message: &str) {
        eprintln!("[revq] run failed: {message}");
    }
}

/// Routes every phase change through the transition table so call-order
/// bugs surface as errors instead of silently skipping states.
struct PhaseTracker<'a, P: QueueReporter> {
    phase: ReviewQueuePhase,
    reporter: &'a P,
}

impl<'a, P: QueueReporter> PhaseTracker<'a, P> {
    fn new(reporter: &'a P) -> Self {
        Self {
            phase: ReviewQueuePhase::Idle,
            reporter,
        }
    }

    fn advance(&mut self, next: ReviewQueuePhase) -> Result<()> {
        if !self.phase.can_transition(next) {
            return Err(Error::ExecutionFailed(format!(
                "illegal phase transition: {} -> {next}",
                self.phase
            )));
        }
        self.phase = next;
        self.reporter.phase_changed(next);
        Ok(())
    }
}

/// The review-queue orchestrator. Stateless across runs: every `run` call
/// builds its own job context, so separate instances (and sequential runs
/// on one instance) cannot interfere.
pub struct ReviewQueue<T> {
    tool: Arc<T>,
    max_concurrency: usize,
}

impl<T: ToolInvoker + 'static> ReviewQueue<T> {
    pub fn new(tool: T) -> Self {
        Self {
            tool: Arc::new(tool),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Run the full pipeline: preparing -> reviewing -> [aggregating] ->
    /// [fixing] -> completed.
    ///
    /// Cancellation is cooperative, checked at stage boundaries. An
    /// in-flight subprocess is allowed to run to its own completion or
    /// timeout; the orchestrator declines to start subsequent stages.
    pub async fn run<P: QueueReporter>(
        &self,
        config: ReviewQueueConfig,
        reporter: &P,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ReviewQueueResult> {
        let mut tracker = PhaseTracker::new(reporter);
        let result = self.run_inner(&config, &mut tracker, cancel).await;

        if let Err(ref e) = result {
            let terminal = if matches!(e, Error::Cancelled) {
                ReviewQueuePhase::Cancelled
            } else {
                ReviewQueuePhase::Failed
            };
            if tracker.phase.can_transition(terminal) {
                tracker.phase = terminal;
                reporter.phase_changed(terminal);
            }
            // Cancellation is a distinct terminal state, never reported as
            // an execution failure.
            if !matches!(e, Error::Cancelled) {
                reporter.run_failed(&e.to_string());
            }
        }

        result
    }

    async fn run_inner<P: QueueReporter>(
        &self,
        config: &ReviewQueueConfig,
        tracker: &mut PhaseTracker<'_, P>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ReviewQueueResult> {
        // Fail-fast validation, before any filesystem or subprocess work.
        if !config.workspace.is_dir() {
            return Err(Error::InvalidWorkspace(config.workspace.clone()));
        }
        if !self.tool.is_installed() {
            return Err(Error::ToolNotInstalled(self.tool.name().to_string()));
        }
        let prompts = config.trimmed_prompts();
        if prompts.is_empty() {
            return Err(Error::EmptyPrompts);
        }
        if config.run_fix && !config.run_aggregate {
            return Err(Error::InvalidStageConfiguration(
                "fix stage requires the aggregate stage".to_string(),
            ));
        }

        tracker.advance(ReviewQueuePhase::Preparing)?;
        let job_id = generate_job_id();
        let job = JobDir::create(&config.workspace, &job_id)?;
        job.write_config(config)?;
        info!(job_id, path = %job.path().display(), "job directory created");

        tracker.advance(ReviewQueuePhase::Reviewing)?;
        let workers: Vec<ReviewWorkerResult> = prompts
            .into_iter()
            .enumerate()
            .map(|(i, prompt)| ReviewWorkerResult::pending(i as u32 + 1, prompt))
            .collect();
        // Observers see the full initial worker set before any work starts.
        for worker in &workers {
            tracker.reporter.worker_updated(worker);
        }

        if cancel_requested(cancel.as_ref()) {
            self.finish(&job, config, ReviewQueuePhase::Cancelled, &workers);
            return Err(Error::Cancelled);
        }

        let workers = self.run_worker_pool(&job, config, workers, tracker.reporter).await?;
        let completed = count_status(&workers, WorkerStatus::Completed);
        let failed = count_status(&workers, WorkerStatus::Failed);
        info!(completed, failed, "review workers finished");

        // Zero usable worker output makes the sequential stages pointless.
        if completed == 0 && (config.run_aggregate || config.run_fix) {
            let detail = workers
                .iter()
                .map(|w| {
                    format!(
                        "worker {}: {}",
                        w.id,
                        w.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            self.finish(&job, config, ReviewQueuePhase::Failed, &workers);
            return Err(Error::ExecutionFailed(format!(
                "all review workers failed: {detail}"
            )));
        }

        let mut aggregate_path = None;
        if config.run_aggregate {
            if cancel_requested(cancel.as_ref()) {
                self.finish(&job, config, ReviewQueuePhase::Cancelled, &workers);
                return Err(Error::Cancelled);
            }
            tracker.advance(ReviewQueuePhase::Aggregating)?;
            let path = match self.run_aggregate_stage(&job, config, &workers).await {
                Ok(path) => path,
                Err(e) => {
                    self.finish(&job, config, ReviewQueuePhase::Failed, &workers);
                    return Err(e);
                }
            };
            tracker.reporter.aggregate_ready(&path);
            aggregate_path = Some(path);
        }

        let mut fix_path = None;
        if config.run_fix {
            if cancel_requested(cancel.as_ref()) {
                self.finish(&job, config, ReviewQueuePhase::Cancelled, &workers);
                return Err(Error::Cancelled);
            }
            // Config validation already guarantees this; guard the
            // invariant anyway since fix input is the aggregate artifact.
            let Some(ref agg) = aggregate_path else {
                self.finish(&job, config, ReviewQueuePhase::Failed, &workers);
                return Err(Error::InvalidStageConfiguration(
                    "fix stage requested without an aggregate artifact".to_string(),
                ));
            };
            tracker.advance(ReviewQueuePhase::Fixing)?;
            let path = match self.run_fix_stage(&job, config, agg).await {
                Ok(path) => path,
                Err(e) => {
                    self.finish(&job, config, ReviewQueuePhase::Failed, &workers);
                    return Err(e);
                }
            };
            tracker.reporter.fix_ready(&path);
            fix_path = Some(path);
        }

        tracker.advance(ReviewQueuePhase::Completed)?;
        self.finish(&job, config, ReviewQueuePhase::Completed, &workers);

        Ok(ReviewQueueResult {
            job_id,
            job_dir: job.path().to_path_buf(),
            workers,
            aggregate_path,
            fix_path,
            completed,
            failed,
        })
    }

    /// Run one review invocation per prompt, bounded by `max_concurrency`.
    /// Workers report updates over a channel; this method is the single
    /// writer applying them. The returned list is sorted by worker id
    /// regardless of completion order.
    async fn run_worker_pool<P: QueueReporter>(
        &self,
        job: &JobDir,
        config: &ReviewQueueConfig,
        workers: Vec<ReviewWorkerResult>,
        reporter: &P,
    ) -> Result<Vec<ReviewWorkerResult>> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<ReviewWorkerResult>();
        let mut join_set = JoinSet::new();

        for seed in workers {
            let tool = Arc::clone(&self.tool);
            let job = job.clone();
            let workspace = config.workspace.clone();
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("worker semaphore closed unexpectedly");
                run_worker(&*tool, &job, &workspace, seed, &tx).await;
            });
        }
        drop(tx);

        let mut finished = Vec::new();
        while let Some(update) = rx.recv().await {
            reporter.worker_updated(&update);
            if update.status.is_terminal() {
                finished.push(update);
            }
        }
        while let Some(joined) = join_set.join_next().await {
            joined.map_err(|e| Error::ExecutionFailed(format!("worker task panicked: {e}")))?;
        }

        finished.sort_by_key(|w| w.id);
        Ok(finished)
    }

    async fn run_aggregate_stage(
        &self,
        job: &JobDir,
        config: &ReviewQueueConfig,
        workers: &[ReviewWorkerResult],
    ) -> Result<PathBuf> {
        let output_path = job.aggregate_path();
        let input = compose_aggregate_input(&config.aggregate_prompt, workers);
        self.run_stage("aggregate", input, output_path, &config.workspace, AGGREGATE_TIMEOUT)
            .await
    }

    async fn run_fix_stage(
        &self,
        job: &JobDir,
        config: &ReviewQueueConfig,
        aggregate_path: &Path,
    ) -> Result<PathBuf> {
        // A transient read failure degrades to an empty context rather
        // than failing the whole pipeline this late.
        let aggregate_content = std::fs::read_to_string(aggregate_path).unwrap_or_else(|e| {
            warn!(error = %e, "failed to read aggregate artifact, fixing without context");
            String::new()
        });
        let output_path = job.fix_path();
        let input = compose_fix_input(&config.fix_prompt, &aggregate_content);
        self.run_stage("fix", input, output_path, &config.workspace, FIX_TIMEOUT)
            .await
    }

    /// Single sequential tool invocation shared by the aggregate and fix
    /// stages. Any failure escalates to a run-level `ExecutionFailed`.
    async fn run_stage(
        &self,
        stage: &str,
        input: String,
        output_path: PathBuf,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<PathBuf> {
        info!(stage, "running stage");
        let request = ExecRequest {
            args: self.tool.build_args(&output_path),
            input,
            working_dir: workspace.to_path_buf(),
            timeout,
        };
        let outcome = self
            .tool
            .execute_with_input(request)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("{stage} stage: {e}")))?;

        if !outcome.success {
            return Err(Error::ExecutionFailed(format!(
                "{stage} stage failed: {}",
                outcome.combined_output().trim()
            )));
        }

        ensure_artifact(&output_path, &outcome);
        Ok(output_path)
    }

    /// Best-effort terminal summary. Never fails the run.
    fn finish(
        &self,
        job: &JobDir,
        config: &ReviewQueueConfig,
        phase: ReviewQueuePhase,
        workers: &[ReviewWorkerResult],
    ) {
        let aggregate_path = Some(job.aggregate_path()).filter(|p| p.exists());
        let fix_path = Some(job.fix_path()).filter(|p| p.exists());
        let summary = ReviewQueueJobSummary {
            version: SUMMARY_VERSION,
            job_id: job.id().to_string(),
            job_dir: job.path().to_path_buf(),
            phase,
            created_at: parse_job_timestamp(job.id()).unwrap_or_else(Utc::now),
            updated_at: Utc::now(),
            worker_count: workers.len(),
            completed: count_status(workers, WorkerStatus::Completed),
            failed: count_status(workers, WorkerStatus::Failed),
            workers: workers.to_vec(),
            aggregate_path,
            fix_path,
            run_aggregate: config.run_aggregate,
            run_fix: config.run_fix,
            model: config.model.clone(),
        };
        job.write_summary(&summary);
    }
}

/// One review worker: invoke the tool with the prompt on stdin, persist
/// raw logs, and guarantee a readable artifact file whatever happened.
/// Reports `running` and the terminal status over the update channel.
async fn run_worker<T: ToolInvoker>(
    tool: &T,
    job: &JobDir,
    workspace: &Path,
    mut worker: ReviewWorkerResult,
    tx: &mpsc::UnboundedSender<ReviewWorkerResult>,
) {
    worker.status = WorkerStatus::Running;
    let _ = tx.send(worker.clone());

    let output_path = job.worker_output_path(worker.id);
    let stdout_path = job.worker_stdout_path(worker.id);
    let stderr_path = job.worker_stderr_path(worker.id);

    let request = ExecRequest {
        args: tool.build_args(&output_path),
        input: worker.prompt.clone(),
        working_dir: workspace.to_path_buf(),
        timeout: REVIEW_TIMEOUT,
    };

    match tool.execute_with_input(request).await {
        Ok(outcome) => {
            persist_log(&stdout_path, &outcome.output);
            persist_log(&stderr_path, &outcome.error_output);
            ensure_artifact(&output_path, &outcome);
            worker.output_path = Some(output_path);
            worker.stdout_path = Some(stdout_path);
            worker.stderr_path = Some(stderr_path);
            if outcome.success {
                worker.status = WorkerStatus::Completed;
            } else {
                worker.status = WorkerStatus::Failed;
                let stderr = outcome.error_output.trim();
                let message = if stderr.is_empty() {
                    outcome.output.trim()
                } else {
                    stderr
                };
                worker.error = Some(message.to_string());
            }
        }
        Err(e) => {
            warn!(worker = worker.id, error = %e, "worker invocation failed");
            persist_log(&output_path, &e.to_string());
            worker.output_path = Some(output_path);
            worker.status = WorkerStatus::Failed;
            worker.error = Some(e.to_string());
        }
    }

    let _ = tx.send(worker);
}

/// Raw log persistence is best-effort: losing a log must not fail a worker.
fn persist_log(path: &Path, content: &str) {
    if let Err(e) = std::fs::write(path, content) {
        warn!(path = %path.display(), error = %e, "failed to persist log");
    }
}

/// If the tool never wrote its own last-message file, fall back to the
/// last structured message in the captured stdout stream, then to the
/// full combined output. Every invocation leaves a readable artifact.
fn ensure_artifact(output_path: &Path, outcome: &ExecOutcome) {
    let present = std::fs::metadata(output_path)
        .map(|m| m.len() > 0)
        .unwrap_or(false);
    if present {
        return;
    }
    let content =
        extract_final_message(&outcome.output).unwrap_or_else(|| outcome.combined_output());
    persist_log(output_path, &content);
}

/// Synthesize the aggregate stage input: the configured aggregate prompt
/// followed by one labeled section per worker. Failed workers contribute
/// their error text so they do not silently vanish from aggregation.
pub fn compose_aggregate_input(aggregate_prompt: &str, workers: &[ReviewWorkerResult]) -> String {
    let sections = workers
        .iter()
        .map(|worker| {
            let content = worker
                .output_path
                .as_deref()
                .and_then(|p| std::fs::read_to_string(p).ok())
                .filter(|c| !c.trim().is_empty())
                .or_else(|| worker.error.clone())
                .unwrap_or_else(|| NO_OUTPUT_PLACEHOLDER.to_string());
            format!(
                "## Worker {} ({})\n\n### Prompt\n\n{}\n\n### Output\n\n{}",
                worker.id, worker.status, worker.prompt, content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!("{aggregate_prompt}\n\n{sections}")
}

/// Synthesize the fix stage input from the aggregate artifact content.
pub fn compose_fix_input(fix_prompt: &str, aggregate_content: &str) -> String {
    format!(
        "{fix_prompt}\n\n## Aggregated review findings (source of truth)\n\n{aggregate_content}"
    )
}

fn count_status(workers: &[ReviewWorkerResult], status: WorkerStatus) -> usize {
    workers.iter().filter(|w| w.status == status).count()
}

fn cancel_requested(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: u32, status: WorkerStatus, error: Option<&str>) -> ReviewWorkerResult {
        ReviewWorkerResult {
            id,
            prompt: format!("prompt {id}"),
            status,
            output_path: None,
            stdout_path: None,
            stderr_path: None,
            error: error.map(String::from),
        }
    }

    #[test]
    fn test_compose_aggregate_input_uses_error_for_failed_worker() {
        let workers = vec![
            worker(1, WorkerStatus::Completed, None),
            worker(2, WorkerStatus::Failed, Some("tool exploded")),
        ];
        let input = compose_aggregate_input("Deduplicate the findings.", &workers);
        assert!(input.starts_with("Deduplicate the findings."));
        assert!(input.contains("## Worker 1 (completed)"));
        assert!(input.contains("## Worker 2 (failed)"));
        assert!(input.contains("tool exploded"));
    }

    #[test]
    fn test_compose_aggregate_input_placeholder_when_nothing_captured() {
        let workers = vec![worker(1, WorkerStatus::Completed, None)];
        let input = compose_aggregate_input("agg", &workers);
        assert!(input.contains(NO_OUTPUT_PLACEHOLDER));
    }

    #[test]
    fn test_compose_aggregate_input_prefers_artifact_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let artifact = dir.path().join("worker-01.md");
        std::fs::write(&artifact, "real findings").unwrap();
        let mut w = worker(1, WorkerStatus::Completed, Some("stale error"));
        w.output_path = Some(artifact);
        let input = compose_aggregate_input("agg", &[w]);
        assert!(input.contains("real findings"));
        assert!(!input.contains("stale error"));
    }

    #[test]
    fn test_compose_fix_input_labels_source_of_truth() {
        let input = compose_fix_input("Fix the issues.", "issue list");
        assert!(input.starts_with("Fix the issues."));
        assert!(input.contains("source of truth"));
        assert!(input.ends_with("issue list"));
    }

    #[test]
    fn test_ensure_artifact_extracts_last_message() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("worker-01.md");
        let outcome = ExecOutcome {
            success: true,
            output:
                r#"{"type":"item.completed","item":{"type":"agent_message","text":"findings"}}"#
                    .to_string(),
            error_output: String::new(),
        };
        ensure_artifact(&path, &outcome);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "findings");
    }

    #[test]
    fn test_ensure_artifact_keeps_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("worker-01.md");
        std::fs::write(&path, "tool wrote this").unwrap();
        let outcome = ExecOutcome {
            success: true,
            output: "noise".to_string(),
            error_output: String::new(),
        };
        ensure_artifact(&path, &outcome);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "tool wrote this");
    }

    #[test]
    fn test_ensure_artifact_falls_back_to_combined_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("worker-01.md");
        let outcome = ExecOutcome {
            success: false,
            output: "plain stdout".to_string(),
            error_output: "plain stderr".to_string(),
        };
        ensure_artifact(&path, &outcome);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "plain stdout\nplain stderr"
        );
    }
}
