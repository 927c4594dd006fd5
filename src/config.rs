use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cli::RunArgs;
use crate::error::{Error, Result};
use crate::model::ReviewQueueConfig;
use crate::queue::DEFAULT_MAX_CONCURRENCY;

pub const DEFAULT_CONFIG_FILE: &str = "revq.toml";
pub const DEFAULT_TOOL_BINARY: &str = "codex";

const DEFAULT_AGGREGATE_PROMPT: &str = "You are given the outputs of several independent code \
reviews of the same workspace. Merge them into a single deduplicated list of issues, ordered by \
severity. Keep file and line references. Drop duplicates and non-actionable remarks.";

const DEFAULT_FIX_PROMPT: &str = "Fix the issues listed below in this workspace. Apply minimal, \
focused changes and report what you changed and what you intentionally left alone.";

/// Optional values loaded from `revq.toml`.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub prompts: Option<Vec<String>>,
    pub aggregate_prompt: Option<String>,
    pub fix_prompt: Option<String>,
    pub model: Option<String>,
    pub tool_binary: Option<String>,
    pub run_aggregate: Option<bool>,
    pub run_fix: Option<bool>,
    pub full_auto: Option<bool>,
    pub skip_repo_check: Option<bool>,
    pub ephemeral: Option<bool>,
    pub max_concurrency: Option<usize>,
}

/// Fully resolved run settings: file values with CLI overrides applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub workspace: PathBuf,
    pub prompts: Vec<String>,
    pub aggregate_prompt: String,
    pub fix_prompt: String,
    pub model: Option<String>,
    pub tool_binary: String,
    pub run_aggregate: bool,
    pub run_fix: bool,
    pub full_auto: bool,
    pub skip_repo_check: bool,
    pub ephemeral: bool,
    pub max_concurrency: usize,
}

impl RunSettings {
    /// Load `revq.toml` (explicit `--config` path must exist; the default
    /// path is optional) and merge CLI overrides on top.
    pub fn load(args: &RunArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.clone()));
                }
                parse_config(&std::fs::read_to_string(path)?)?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    parse_config(&std::fs::read_to_string(path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        Ok(merge(file, args))
    }

    /// The immutable per-run request handed to the orchestrator.
    pub fn to_queue_config(&self) -> ReviewQueueConfig {
        ReviewQueueConfig {
            workspace: self.workspace.clone(),
            prompts: self.prompts.clone(),
            aggregate_prompt: self.aggregate_prompt.clone(),
            fix_prompt: self.fix_prompt.clone(),
            run_aggregate: self.run_aggregate,
            run_fix: self.run_fix,
            model: self.model.clone(),
            full_auto: self.full_auto,
            skip_repo_check: self.skip_repo_check,
            ephemeral: self.ephemeral,
        }
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(max) = config.max_concurrency
        && max == 0
    {
        return Err(Error::ConfigValidation(
            "max_concurrency must be > 0".to_string(),
        ));
    }
    if config.run_fix == Some(true) && config.run_aggregate == Some(false) {
        return Err(Error::ConfigValidation(
            "run_fix requires run_aggregate".to_string(),
        ));
    }
    Ok(())
}

pub fn merge(file: ConfigFile, args: &RunArgs) -> RunSettings {
    let run_aggregate = if args.no_aggregate {
        false
    } else {
        file.run_aggregate.unwrap_or(true)
    };
    let run_fix = if args.no_fix {
        false
    } else if args.fix {
        true
    } else {
        file.run_fix.unwrap_or(false)
    };

    RunSettings {
        workspace: args.workspace.clone(),
        prompts: if args.prompts.is_empty() {
            file.prompts.unwrap_or_default()
        } else {
            args.prompts.clone()
        },
        aggregate_prompt: file
            .aggregate_prompt
            .unwrap_or_else(|| DEFAULT_AGGREGATE_PROMPT.to_string()),
        fix_prompt: file
            .fix_prompt
            .unwrap_or_else(|| DEFAULT_FIX_PROMPT.to_string()),
        model: args.model.clone().or(file.model),
        tool_binary: args
            .tool_binary
            .clone()
            .or(file.tool_binary)
            .unwrap_or_else(|| DEFAULT_TOOL_BINARY.to_string()),
        run_aggregate,
        run_fix,
        full_auto: args.full_auto || file.full_auto.unwrap_or(false),
        skip_repo_check: args.skip_repo_check || file.skip_repo_check.unwrap_or(false),
        ephemeral: args.ephemeral || file.ephemeral.unwrap_or(false),
        max_concurrency: args
            .max_concurrency
            .or(file.max_concurrency)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY),
    }
}
