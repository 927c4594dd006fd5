use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use revq::cli::{Cli, CliCommand, HistoryArgs, RunArgs};
use revq::config::RunSettings;
use revq::error::Error;
use revq::history::load_history;
use revq::queue::{ReviewQueue, StderrReporter};
use revq::tool::{CodexFlags, CodexTool};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        CliCommand::Run(args) => run(args).await,
        CliCommand::History(args) => history(args),
    }
}

async fn run(args: RunArgs) {
    let settings = match RunSettings::load(&args) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    info!(
        workspace = %settings.workspace.display(),
        workers = settings.prompts.len(),
        run_aggregate = settings.run_aggregate,
        run_fix = settings.run_fix,
        "starting review queue"
    );

    let tool = CodexTool::new(
        settings.tool_binary.clone(),
        CodexFlags {
            model: settings.model.clone(),
            full_auto: settings.full_auto,
            skip_repo_check: settings.skip_repo_check,
            ephemeral: settings.ephemeral,
        },
    );
    let queue = ReviewQueue::new(tool).with_max_concurrency(settings.max_concurrency);

    // First Ctrl-C requests cooperative cancellation; the run stops at the
    // next stage boundary while any in-flight codex process finishes.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[revq] cancellation requested, finishing current stage");
            let _ = cancel_tx.send(true);
        }
    });

    match queue
        .run(settings.to_queue_config(), &StderrReporter, Some(cancel_rx))
        .await
    {
        Ok(result) => {
            println!("job {} completed", result.job_id);
            println!("  directory: {}", result.job_dir.display());
            println!(
                "  workers: {} completed, {} failed",
                result.completed, result.failed
            );
            if let Some(path) = result.aggregate_path {
                println!("  aggregate: {}", path.display());
            }
            if let Some(path) = result.fix_path {
                println!("  fix report: {}", path.display());
            }
        }
        Err(Error::Cancelled) => {
            eprintln!("cancelled");
            std::process::exit(130);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn history(args: HistoryArgs) {
    let items = load_history(&args.workspace);

    if args.json {
        match serde_json::to_string_pretty(&items) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    if items.is_empty() {
        println!("no review-queue jobs found");
        return;
    }
    for item in items {
        let created = item
            .created_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{}  {}  workers={} failed={}  {}",
            item.job_id, item.phase, item.worker_count, item.failed, created
        );
    }
}
