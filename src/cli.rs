use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// revq: parallel code-review queue driven by the codex CLI
#[derive(Parser, Debug, Clone)]
#[command(name = "revq", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Run the review queue against a workspace
    Run(RunArgs),

    /// List past review-queue jobs for a workspace
    History(HistoryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Workspace directory to review
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Review prompt; repeat for one worker per prompt (overrides config file prompts)
    #[arg(long = "prompt")]
    pub prompts: Vec<String>,

    /// Path to config file (default: revq.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Model identifier forwarded to the tool
    #[arg(long)]
    pub model: Option<String>,

    /// External tool binary (default: codex)
    #[arg(long)]
    pub tool_binary: Option<String>,

    /// Forward --full-auto to the tool
    #[arg(long)]
    pub full_auto: bool,

    /// Forward --skip-git-repo-check to the tool
    #[arg(long)]
    pub skip_repo_check: bool,

    /// Forward --ephemeral to the tool
    #[arg(long)]
    pub ephemeral: bool,

    /// Skip the aggregate stage (implies no fix stage)
    #[arg(long)]
    pub no_aggregate: bool,

    /// Run the fix stage after aggregation
    #[arg(long, conflicts_with = "no_fix")]
    pub fix: bool,

    /// Skip the fix stage even if the config file enables it
    #[arg(long)]
    pub no_fix: bool,

    /// Maximum concurrently running review workers
    #[arg(long)]
    pub max_concurrency: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Workspace directory whose jobs to list
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Emit history as JSON
    #[arg(long)]
    pub json: bool,
}
