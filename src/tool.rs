use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::process::{ProcessConfig, spawn_and_capture};

/// One tool invocation: arguments, prompt piped on stdin, working
/// directory, and a hard timeout.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub args: Vec<String>,
    pub input: String,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

/// Captured result of a tool invocation.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub success: bool,
    pub output: String,
    pub error_output: String,
}

impl ExecOutcome {
    pub fn combined_output(&self) -> String {
        if self.error_output.trim().is_empty() {
            self.output.clone()
        } else {
            format!("{}\n{}", self.output, self.error_output)
        }
    }
}

/// Boundary to the external code-assistant CLI. The orchestrator only ever
/// talks to this trait; tests substitute scripted implementations.
pub trait ToolInvoker: Send + Sync {
    fn name(&self) -> &str;

    fn is_installed(&self) -> bool;

    /// Arguments for one invocation whose final message should land at
    /// `last_message_path`. The prompt itself travels on stdin.
    fn build_args(&self, last_message_path: &Path) -> Vec<String>;

    fn execute_with_input(
        &self,
        request: ExecRequest,
    ) -> impl std::future::Future<Output = Result<ExecOutcome>> + Send;
}

/// Execution flags forwarded verbatim to the codex CLI.
#[derive(Debug, Clone, Default)]
pub struct CodexFlags {
    pub model: Option<String>,
    pub full_auto: bool,
    pub skip_repo_check: bool,
    pub ephemeral: bool,
}

/// Production invoker for the codex CLI.
pub struct CodexTool {
    binary: String,
    flags: CodexFlags,
}

impl CodexTool {
    pub fn new(binary: impl Into<String>, flags: CodexFlags) -> Self {
        Self {
            binary: binary.into(),
            flags,
        }
    }
}

impl ToolInvoker for CodexTool {
    fn name(&self) -> &str {
        &self.binary
    }

    fn is_installed(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    /// Arguments for one `codex exec` invocation. The trailing `-` tells
    /// codex the prompt follows on stdin.
    fn build_args(&self, last_message_path: &Path) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--json".to_string(),
            "--output-last-message".to_string(),
            last_message_path.display().to_string(),
        ];

        if let Some(ref model) = self.flags.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if self.flags.full_auto {
            args.push("--full-auto".to_string());
        }
        if self.flags.skip_repo_check {
            args.push("--skip-git-repo-check".to_string());
        }
        if self.flags.ephemeral {
            args.push("--ephemeral".to_string());
        }

        args.push("-".to_string());
        args
    }

    async fn execute_with_input(&self, request: ExecRequest) -> Result<ExecOutcome> {
        let config = ProcessConfig {
            command: self.binary.clone(),
            args: request.args,
            working_dir: request.working_dir,
            timeout: Some(request.timeout),
            stdin_data: Some(request.input),
        };

        let output = spawn_and_capture(config).await?;

        Ok(ExecOutcome {
            success: output.success(),
            output: output.stdout,
            error_output: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_defaults() {
        let tool = CodexTool::new("codex", CodexFlags::default());
        let args = tool.build_args(Path::new("/tmp/job/worker-01.md"));
        assert_eq!(args[0], "exec");
        assert!(args.contains(&"--json".to_string()));
        assert!(args.contains(&"--output-last-message".to_string()));
        assert!(args.contains(&"/tmp/job/worker-01.md".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
        assert!(!args.contains(&"--model".to_string()));
        assert!(!args.contains(&"--full-auto".to_string()));
        assert!(!args.contains(&"--skip-git-repo-check".to_string()));
        assert!(!args.contains(&"--ephemeral".to_string()));
    }

    #[test]
    fn test_build_args_all_flags() {
        let tool = CodexTool::new(
            "codex",
            CodexFlags {
                model: Some("gpt-5-codex".to_string()),
                full_auto: true,
                skip_repo_check: true,
                ephemeral: true,
            },
        );
        let args = tool.build_args(Path::new("/tmp/aggregate.md"));
        assert!(args.contains(&"--model".to_string()));
        assert!(args.contains(&"gpt-5-codex".to_string()));
        assert!(args.contains(&"--full-auto".to_string()));
        assert!(args.contains(&"--skip-git-repo-check".to_string()));
        assert!(args.contains(&"--ephemeral".to_string()));
        // stdin marker stays last even with flags present
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_combined_output_skips_blank_stderr() {
        let outcome = ExecOutcome {
            success: true,
            output: "out".to_string(),
            error_output: "  \n".to_string(),
        };
        assert_eq!(outcome.combined_output(), "out");

        let outcome = ExecOutcome {
            success: false,
            output: "out".to_string(),
            error_output: "err".to_string(),
        };
        assert_eq!(outcome.combined_output(), "out\nerr");
    }

    #[test]
    fn test_is_installed_missing_binary() {
        let tool = CodexTool::new("revq-no-such-tool-xyz", CodexFlags::default());
        assert!(!tool.is_installed());
    }
}
