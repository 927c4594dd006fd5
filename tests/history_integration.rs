use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use revq::history::load_history;
use revq::job::queue_root;
use revq::model::{
    ReviewQueueConfig, ReviewQueueJobSummary, ReviewQueuePhase, SUMMARY_VERSION,
};

fn make_job(ws: &Path, id: &str) -> PathBuf {
    let dir = queue_root(ws).join(id);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_config(job: &Path, run_aggregate: bool, run_fix: bool) {
    let config = ReviewQueueConfig {
        workspace: job.to_path_buf(),
        prompts: vec!["p".to_string()],
        aggregate_prompt: "agg".to_string(),
        fix_prompt: "fix".to_string(),
        run_aggregate,
        run_fix,
        model: None,
        full_auto: false,
        skip_repo_check: false,
        ephemeral: false,
    };
    std::fs::write(
        job.join("config.json"),
        serde_json::to_string_pretty(&config).unwrap(),
    )
    .unwrap();
}

#[test]
fn test_no_stage_config_with_workers_is_completed() {
    // worker-01.md + worker-02.md, no summary, no stage artifacts, config
    // requests neither aggregate nor fix.
    let ws = tempfile::TempDir::new().unwrap();
    let job = make_job(ws.path(), "20260810-093000-abc123");
    write_config(&job, false, false);
    std::fs::write(job.join("worker-01.md"), "findings").unwrap();
    std::fs::write(job.join("worker-02.md"), "findings").unwrap();

    let items = load_history(ws.path());
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.phase, ReviewQueuePhase::Completed);
    assert_eq!(item.worker_count, 2);
    assert_eq!(item.failed, 0);
    assert!(!item.run_aggregate);
    assert!(!item.run_fix);
}

#[test]
fn test_fix_artifact_implies_completed() {
    let ws = tempfile::TempDir::new().unwrap();
    let job = make_job(ws.path(), "20260810-093000-abc123");
    write_config(&job, true, true);
    std::fs::write(job.join("worker-01.md"), "findings").unwrap();
    std::fs::write(job.join("aggregate.md"), "issues").unwrap();
    std::fs::write(job.join("fix.md"), "fixed").unwrap();

    let items = load_history(ws.path());
    assert_eq!(items[0].phase, ReviewQueuePhase::Completed);
    assert!(items[0].aggregate_path.is_some());
    assert!(items[0].fix_path.is_some());
}

#[test]
fn test_aggregate_only_config_with_aggregate_artifact_is_completed() {
    let ws = tempfile::TempDir::new().unwrap();
    let job = make_job(ws.path(), "20260810-093000-abc123");
    write_config(&job, true, false);
    std::fs::write(job.join("worker-01.md"), "findings").unwrap();
    std::fs::write(job.join("aggregate.md"), "issues").unwrap();

    let items = load_history(ws.path());
    assert_eq!(items[0].phase, ReviewQueuePhase::Completed);
}

#[test]
fn test_fix_pending_after_aggregate_is_aggregating() {
    // Fix requested but fix.md absent: the run stopped after aggregation.
    let ws = tempfile::TempDir::new().unwrap();
    let job = make_job(ws.path(), "20260810-093000-abc123");
    write_config(&job, true, true);
    std::fs::write(job.join("worker-01.md"), "findings").unwrap();
    std::fs::write(job.join("aggregate.md"), "issues").unwrap();

    let items = load_history(ws.path());
    assert_eq!(items[0].phase, ReviewQueuePhase::Aggregating);
}

#[test]
fn test_all_workers_failed_is_failed() {
    let ws = tempfile::TempDir::new().unwrap();
    let job = make_job(ws.path(), "20260810-093000-abc123");
    write_config(&job, true, false);
    for id in ["01", "02"] {
        std::fs::write(job.join(format!("worker-{id}.md")), "error text").unwrap();
        std::fs::write(job.join(format!("worker-{id}.stderr.log")), "stack trace").unwrap();
    }

    let items = load_history(ws.path());
    assert_eq!(items[0].phase, ReviewQueuePhase::Failed);
    assert_eq!(items[0].failed, 2);
}

#[test]
fn test_workers_only_without_config_is_reviewing() {
    // No config.json at all: stage intent unknown, stay conservative.
    let ws = tempfile::TempDir::new().unwrap();
    let job = make_job(ws.path(), "20260810-093000-abc123");
    std::fs::write(job.join("worker-01.md"), "findings").unwrap();

    let items = load_history(ws.path());
    assert_eq!(items[0].phase, ReviewQueuePhase::Reviewing);
}

#[test]
fn test_sort_newest_first_with_unparseable_ids_last() {
    let ws = tempfile::TempDir::new().unwrap();
    make_job(ws.path(), "20260810-093000-abc123");
    make_job(ws.path(), "20260812-170000-def456");
    make_job(ws.path(), "20260811-120000-aaa111");
    make_job(ws.path(), "imported-manually");

    let items = load_history(ws.path());
    let ids: Vec<&str> = items.iter().map(|i| i.job_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "20260812-170000-def456",
            "20260811-120000-aaa111",
            "20260810-093000-abc123",
            "imported-manually",
        ]
    );
    assert!(items[3].created_at.is_none());
}

#[test]
fn test_unparseable_ids_sort_among_themselves_by_id_descending() {
    let ws = tempfile::TempDir::new().unwrap();
    make_job(ws.path(), "zz-import");
    make_job(ws.path(), "aa-import");
    make_job(ws.path(), "20260810-093000-abc123");

    let items = load_history(ws.path());
    let ids: Vec<&str> = items.iter().map(|i| i.job_id.as_str()).collect();
    assert_eq!(ids, vec!["20260810-093000-abc123", "zz-import", "aa-import"]);
}

#[test]
fn test_summary_is_authoritative_when_present() {
    let ws = tempfile::TempDir::new().unwrap();
    let job = make_job(ws.path(), "20260810-093000-abc123");
    // On-disk files alone would reconstruct this as reviewing; the
    // summary must win.
    std::fs::write(job.join("worker-01.md"), "findings").unwrap();
    let created = Utc.with_ymd_and_hms(2026, 8, 10, 7, 30, 0).unwrap();
    let summary = ReviewQueueJobSummary {
        version: SUMMARY_VERSION,
        job_id: "20260810-093000-abc123".to_string(),
        job_dir: job.clone(),
        phase: ReviewQueuePhase::Cancelled,
        created_at: created,
        updated_at: created,
        worker_count: 3,
        completed: 1,
        failed: 2,
        workers: Vec::new(),
        aggregate_path: None,
        fix_path: None,
        run_aggregate: true,
        run_fix: false,
        model: Some("gpt-5-codex".to_string()),
    };
    std::fs::write(
        job.join("summary.json"),
        serde_json::to_string_pretty(&summary).unwrap(),
    )
    .unwrap();

    let items = load_history(ws.path());
    let item = &items[0];
    assert_eq!(item.phase, ReviewQueuePhase::Cancelled);
    assert_eq!(item.worker_count, 3);
    assert_eq!(item.failed, 2);
    assert_eq!(item.created_at, Some(created));
    assert_eq!(item.model.as_deref(), Some("gpt-5-codex"));
}

#[test]
fn test_summary_stage_paths_dropped_when_files_deleted() {
    let ws = tempfile::TempDir::new().unwrap();
    let job = make_job(ws.path(), "20260810-093000-abc123");
    let kept = job.join("aggregate.md");
    std::fs::write(&kept, "issues").unwrap();
    let deleted = job.join("fix.md");
    let created = Utc.with_ymd_and_hms(2026, 8, 10, 7, 30, 0).unwrap();
    let summary = ReviewQueueJobSummary {
        version: SUMMARY_VERSION,
        job_id: "20260810-093000-abc123".to_string(),
        job_dir: job.clone(),
        phase: ReviewQueuePhase::Completed,
        created_at: created,
        updated_at: created,
        worker_count: 1,
        completed: 1,
        failed: 0,
        workers: Vec::new(),
        aggregate_path: Some(kept.clone()),
        fix_path: Some(deleted),
        run_aggregate: true,
        run_fix: true,
        model: None,
    };
    std::fs::write(
        job.join("summary.json"),
        serde_json::to_string_pretty(&summary).unwrap(),
    )
    .unwrap();

    let items = load_history(ws.path());
    assert_eq!(items[0].aggregate_path, Some(kept));
    assert_eq!(items[0].fix_path, None);
}

#[test]
fn test_stray_files_in_queue_root_ignored() {
    let ws = tempfile::TempDir::new().unwrap();
    make_job(ws.path(), "20260810-093000-abc123");
    std::fs::write(queue_root(ws.path()).join("notes.txt"), "stray").unwrap();

    let items = load_history(ws.path());
    assert_eq!(items.len(), 1);
}
