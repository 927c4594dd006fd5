use std::cmp::Ordering;
use std::path::Path;

use regex::Regex;
use tracing::warn;

use crate::job::{AGGREGATE_FILE, CONFIG_FILE, FIX_FILE, SUMMARY_FILE, parse_job_timestamp, queue_root};
use crate::model::{
    ReviewQueueConfig, ReviewQueueHistoryItem, ReviewQueueJobSummary, ReviewQueuePhase,
};

/// List past jobs under a workspace, newest first.
///
/// Pure read-only scan, tolerant of anything: a missing queue root yields
/// an empty list, and malformed or partial job directories are
/// reconstructed from whatever files remain rather than skipped.
pub fn load_history(workspace: &Path) -> Vec<ReviewQueueHistoryItem> {
    let root = queue_root(workspace);
    let Ok(entries) = std::fs::read_dir(&root) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        items.push(load_item(&path));
    }

    // Newest first; entries without a parseable timestamp sort last and
    // fall back to job-id order among themselves.
    items.sort_by(|a, b| match (&a.created_at, &b.created_at) {
        (Some(x), Some(y)) => y.cmp(x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.job_id.cmp(&a.job_id),
    });
    items
}

fn load_item(job_dir: &Path) -> ReviewQueueHistoryItem {
    let job_id = job_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(summary) = read_summary(job_dir) {
        return ReviewQueueHistoryItem {
            job_id,
            job_dir: job_dir.to_path_buf(),
            phase: summary.phase,
            created_at: Some(summary.created_at),
            worker_count: summary.worker_count,
            failed: summary.failed,
            aggregate_path: summary.aggregate_path.filter(|p| p.exists()),
            fix_path: summary.fix_path.filter(|p| p.exists()),
            run_aggregate: summary.run_aggregate,
            run_fix: summary.run_fix,
            model: summary.model,
        };
    }

    reconstruct_item(job_dir, job_id)
}

/// Rebuild a history entry from on-disk files alone: the run never wrote
/// its summary (crash, kill, old version).
fn reconstruct_item(job_dir: &Path, job_id: String) -> ReviewQueueHistoryItem {
    let config = read_config(job_dir);
    let run_aggregate = config.as_ref().map(|c| c.run_aggregate).unwrap_or(false);
    let run_fix = config.as_ref().map(|c| c.run_fix).unwrap_or(false);
    let model = config.as_ref().and_then(|c| c.model.clone());

    let worker_ids = scan_worker_ids(job_dir);
    let worker_count = worker_ids.len();
    let failed = worker_ids
        .iter()
        .filter(|id| stderr_nonempty(job_dir, **id))
        .count();

    let aggregate_path = Some(job_dir.join(AGGREGATE_FILE)).filter(|p| p.exists());
    let fix_path = Some(job_dir.join(FIX_FILE)).filter(|p| p.exists());

    // Inference precedence: a later stage's artifact implies the earlier
    // stages finished. Ambiguous directories stay `reviewing` rather than
    // guessing finer.
    let phase = if fix_path.is_some() {
        ReviewQueuePhase::Completed
    } else if worker_count > 0 && failed == worker_count {
        ReviewQueuePhase::Failed
    } else if aggregate_path.is_some() {
        if run_aggregate && !run_fix {
            ReviewQueuePhase::Completed
        } else {
            ReviewQueuePhase::Aggregating
        }
    } else if config.is_some() && !run_aggregate && !run_fix && worker_count > 0 {
        ReviewQueuePhase::Completed
    } else {
        ReviewQueuePhase::Reviewing
    };

    ReviewQueueHistoryItem {
        created_at: parse_job_timestamp(&job_id),
        job_id,
        job_dir: job_dir.to_path_buf(),
        phase,
        worker_count,
        failed,
        aggregate_path,
        fix_path,
        run_aggregate,
        run_fix,
        model,
    }
}

fn read_summary(job_dir: &Path) -> Option<ReviewQueueJobSummary> {
    let path = job_dir.join(SUMMARY_FILE);
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed job summary");
            None
        }
    }
}

fn read_config(job_dir: &Path) -> Option<ReviewQueueConfig> {
    let content = std::fs::read_to_string(job_dir.join(CONFIG_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}

fn scan_worker_ids(job_dir: &Path) -> Vec<u32> {
    let pattern = Regex::new(r"^worker-(\d{2})\.md$").expect("static regex");
    let Ok(entries) = std::fs::read_dir(job_dir) else {
        return Vec::new();
    };
    let mut ids: Vec<u32> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            pattern
                .captures(&name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
        .collect();
    ids.sort_unstable();
    ids
}

fn stderr_nonempty(job_dir: &Path, worker_id: u32) -> bool {
    let path = job_dir.join(format!("worker-{worker_id:02}.stderr.log"));
    std::fs::read_to_string(path)
        .map(|c| !c.trim().is_empty())
        .unwrap_or(false)
}
