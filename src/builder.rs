/// Runs the configured build command through `sh -c` in the watch root.
use crate::error::SupervisorError;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Result of a build command that ran to completion.
#[derive(Debug)]
pub struct BuildOutput {
    pub status: ExitStatus,
    /// Combined stdout and stderr, in the order the command wrote them.
    pub output: String,
    pub duration: Duration,
}

impl BuildOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run `command` and wait for it. There is no timeout: a build always runs
/// to completion or failure, unless the future is dropped, which kills the
/// build shell.
pub async fn run_build(command: &str, root: &Path) -> Result<BuildOutput, SupervisorError> {
    tracing::info!(command, root = %root.display(), "running build command");
    let start = Instant::now();

    // stderr is folded into stdout inside the shell so the two stay interleaved.
    let script = format!("exec 2>&1\n{command}");
    let output = Command::new("sh")
        .arg("-c")
        .arg(&script)
        .current_dir(root)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SupervisorError::BuildSpawn {
            command: command.to_string(),
            source: e,
        })?;

    let duration = start.elapsed();
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
    }

    tracing::info!(
        exit_code = ?output.status.code(),
        output_bytes = combined.len(),
        duration_ms = duration.as_millis() as u64,
        "build command finished"
    );

    Ok(BuildOutput {
        status: output.status,
        output: combined,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_successful_build() {
        let dir = tempdir().unwrap();
        let result = run_build("echo compiling", dir.path()).await.unwrap();
        assert!(result.success());
        assert_eq!(result.output.trim(), "compiling");
    }

    #[tokio::test]
    async fn test_failed_build_keeps_output() {
        let dir = tempdir().unwrap();
        let result = run_build("echo 'main.go:3: syntax error' >&2; exit 2", dir.path())
            .await
            .unwrap();
        assert!(!result.success());
        assert_eq!(result.status.code(), Some(2));
        assert!(result.output.contains("syntax error"));
    }

    #[tokio::test]
    async fn test_output_streams_are_interleaved() {
        let dir = tempdir().unwrap();
        let result = run_build("echo one; echo two >&2; echo three", dir.path())
            .await
            .unwrap();
        let lines: Vec<&str> = result.output.lines().collect();
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_runs_in_root() {
        let dir = tempdir().unwrap();
        run_build("mkdir -p tmp && touch tmp/app", dir.path())
            .await
            .unwrap();
        assert!(dir.path().join("tmp/app").exists());
    }

    #[tokio::test]
    async fn test_missing_root_is_spawn_error() {
        let err = run_build("true", Path::new("/nonexistent-aegis-root"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::BuildSpawn { .. }));
    }
}
