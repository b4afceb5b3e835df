//! External process execution
//!
//! Every probe, transcode and overlay render goes through [`ProcessRunner`],
//! which applies a uniform timeout and kills the child when it expires.
//! [`RenderResult`] is the success contract for invocations that produce an
//! output file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Captured result of one process run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when killed by a signal, timed out or never spawned
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status_code == Some(0)
    }

    /// Output for a process that could not be started.
    pub fn spawn_failure(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            stdout: String::new(),
            stderr: message.into(),
            timed_out: false,
        }
    }
}

/// Runs external programs
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`, waiting at most `limit`.
    ///
    /// Spawn failures are reported through [`ProcessOutput::spawn_failure`]
    /// rather than an error so callers have a single failure path.
    async fn run(&self, program: &str, args: &[String], limit: Duration) -> ProcessOutput;
}

/// [`ProcessRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &str, args: &[String], limit: Duration) -> ProcessOutput {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ProcessOutput::spawn_failure(format!("failed to spawn {}: {}", program, e))
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => ProcessOutput {
                status_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            },
            Ok(Err(e)) => ProcessOutput::spawn_failure(format!("failed to wait on {}: {}", program, e)),
            Err(_) => ProcessOutput {
                status_code: None,
                stdout: String::new(),
                stderr: format!("{} timed out after {}s", program, limit.as_secs()),
                timed_out: true,
            },
        }
    }
}

/// Outcome of an invocation that should produce `output_path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub success: bool,
    pub output_path: PathBuf,
    pub diagnostic: Option<String>,
}

impl RenderResult {
    /// Judge a finished run against the file it was meant to produce.
    ///
    /// Success requires a clean exit and a non-empty output. On failure a
    /// zero-byte output is removed so it can never be mistaken for a result.
    pub async fn from_output(output: &ProcessOutput, output_path: &Path) -> Self {
        let size = file_size(output_path).await;

        if output.success() && size.is_some_and(|len| len > 0) {
            return Self {
                success: true,
                output_path: output_path.to_path_buf(),
                diagnostic: None,
            };
        }

        if size == Some(0) {
            if let Err(e) = tokio::fs::remove_file(output_path).await {
                tracing::debug!(path = %output_path.display(), error = %e, "failed to remove empty output");
            }
        }

        let diagnostic = if output.success() {
            "process exited cleanly but output is missing or empty".to_string()
        } else {
            format!(
                "rc={} stderr={}",
                output
                    .status_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                output.stderr.trim()
            )
        };

        Self {
            success: false,
            output_path: output_path.to_path_buf(),
            diagnostic: Some(diagnostic),
        }
    }
}

/// Size of the file at `path`, or `None` when it does not exist or is not a file.
pub async fn file_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Whether `path` is an existing, non-empty file.
pub async fn is_nonempty_file(path: &Path) -> bool {
    file_size(path).await.is_some_and(|len| len > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_exit() -> ProcessOutput {
        ProcessOutput {
            status_code: Some(0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_render_result_success() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        tokio::fs::write(&out, b"data").await.unwrap();

        let result = RenderResult::from_output(&clean_exit(), &out).await;
        assert!(result.success);
        assert_eq!(result.output_path, out);
        assert!(result.diagnostic.is_none());
    }

    #[tokio::test]
    async fn test_render_result_removes_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        tokio::fs::write(&out, b"").await.unwrap();

        let result = RenderResult::from_output(&clean_exit(), &out).await;
        assert!(!result.success);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_render_result_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        tokio::fs::write(&out, b"partial").await.unwrap();

        let output = ProcessOutput {
            status_code: Some(1),
            stderr: "boom\n".to_string(),
            ..Default::default()
        };
        let result = RenderResult::from_output(&output, &out).await;
        assert!(!result.success);
        assert_eq!(result.diagnostic.as_deref(), Some("rc=1 stderr=boom"));
    }

    #[tokio::test]
    async fn test_render_result_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        tokio::fs::write(&out, b"data").await.unwrap();

        let output = ProcessOutput {
            status_code: None,
            timed_out: true,
            ..Default::default()
        };
        assert!(!RenderResult::from_output(&output, &out).await.success);
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let runner = TokioProcessRunner;
        let output = runner
            .run("/nonexistent/relaymark-tool", &[], Duration::from_secs(1))
            .await;
        assert!(!output.success());
        assert!(output.stderr.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_is_nonempty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        assert!(!is_nonempty_file(&path).await);
        tokio::fs::write(&path, b"").await.unwrap();
        assert!(!is_nonempty_file(&path).await);
        tokio::fs::write(&path, b"x").await.unwrap();
        assert!(is_nonempty_file(&path).await);
        assert!(!is_nonempty_file(dir.path()).await);
    }
}
