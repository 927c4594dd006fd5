use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

use crate::error::{Error, Result};

/// Configuration for spawning a child process.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub stdin_data: Option<String>,
}

/// Captured output from a completed child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }
}

/// Spawn a child process, optionally pipe data to its stdin, and capture
/// stdout/stderr to completion.
///
/// The child is placed in its own process group on Unix. On timeout the
/// group receives SIGTERM, then SIGKILL after a short grace period.
pub async fn spawn_and_capture(config: ProcessConfig) -> Result<ProcessOutput> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .current_dir(&config.working_dir)
        .stdin(if config.stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Process(format!("failed to spawn '{}': {e}", config.command)))?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Process("child has no pid".into()))?;

    if let Some(data) = config.stdin_data {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Process("stdin is not piped".into()))?;
        // Write stdin in a detached task so a child that fills its stdout
        // pipe before reading stdin cannot deadlock us.
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(data.as_bytes()).await {
                warn!(error = %e, "failed to write child stdin");
            }
        });
    }

    let wait = child.wait_with_output();
    let output = if let Some(dur) = config.timeout {
        match tokio::time::timeout(dur, wait).await {
            Ok(r) => r.map_err(|e| Error::Process(format!("wait error: {e}")))?,
            Err(_) => {
                #[cfg(unix)]
                unsafe {
                    libc::killpg(pid as i32, libc::SIGTERM);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
                #[cfg(unix)]
                unsafe {
                    libc::killpg(pid as i32, libc::SIGKILL);
                }
                return Err(Error::Process(format!("process timed out after {dur:?}")));
            }
        }
    } else {
        wait.await
            .map_err(|e| Error::Process(format!("wait error: {e}")))?
    };

    let (exit_code, signal) = extract_exit_info(&output.status);

    Ok(ProcessOutput {
        exit_code,
        signal,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn extract_exit_info(status: &std::process::ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return (128 + sig, Some(sig));
        }
    }
    (-1, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str, args: &[&str]) -> ProcessConfig {
        ProcessConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: std::env::temp_dir(),
            timeout: None,
            stdin_data: None,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let output = spawn_and_capture(config("echo", &["hello"])).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let output = spawn_and_capture(config("sh", &["-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_stdin_is_piped() {
        let mut cfg = config("cat", &[]);
        cfg.stdin_data = Some("piped input".to_string());
        let output = spawn_and_capture(cfg).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "piped input");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let mut cfg = config("sleep", &["30"]);
        cfg.timeout = Some(Duration::from_millis(200));
        let err = spawn_and_capture(cfg).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = spawn_and_capture(config("revq-definitely-not-a-binary", &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
