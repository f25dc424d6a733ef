/// Supervisor error taxonomy.
///
/// Every variant ends up on the event stream as `Event::Error`. Only the
/// revert variants are unrecoverable within a build cycle; everything else is
/// absorbed by the orchestrator and answered with a revert attempt.
use std::path::PathBuf;
use std::process::ExitStatus;

/// How loudly an error should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Degrades future recovery but the cycle carries on.
    Warning,
    /// Recoverable by reverting to the last stable binary.
    Error,
    /// Revert itself failed; nothing may be running until the next good build.
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// Why a challenger stopped before its probation window elapsed.
#[derive(Debug)]
pub enum ExitCause {
    /// The process exited (cleanly, with a code, or by signal).
    Status(ExitStatus),
    /// Waiting on the process failed, so its fate is unknown.
    Wait(std::io::Error),
}

impl std::fmt::Display for ExitCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCause::Status(status) => write!(f, "{status}"),
            ExitCause::Wait(e) => write!(f, "wait failed: {e}"),
        }
    }
}

#[derive(Debug)]
pub enum SupervisorError {
    /// The file watcher could not be created or the root could not be watched.
    WatchSetup {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The watcher stopped delivering events after setup.
    WatchStream { source: std::io::Error },
    /// The build shell could not be launched.
    BuildSpawn {
        command: String,
        source: std::io::Error,
    },
    /// The build command ran and exited unsuccessfully.
    BuildExecution { command: String, status: ExitStatus },
    /// The built (or restored) executable could not be launched.
    ProcessStart {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The challenger exited before surviving probation.
    CrashDuringProbation { cause: ExitCause },
    /// The current binary could not be moved aside before building.
    BinaryBackup {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    /// A leftover binary (broken build or spent backup) could not be deleted.
    BinaryCleanup {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The backup could not be moved back into place.
    RevertRename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    /// The restored backup could not be started again.
    RevertRestart {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SupervisorError {
    pub fn severity(&self) -> Severity {
        match self {
            SupervisorError::BinaryBackup { .. } | SupervisorError::BinaryCleanup { .. } => {
                Severity::Warning
            }
            SupervisorError::RevertRename { .. } | SupervisorError::RevertRestart { .. } => {
                Severity::Critical
            }
            _ => Severity::Error,
        }
    }

    /// Short stable label (snake_case) for logs and JSON output.
    pub fn label(&self) -> &'static str {
        match self {
            SupervisorError::WatchSetup { .. } => "watch_setup",
            SupervisorError::WatchStream { .. } => "watch_stream",
            SupervisorError::BuildSpawn { .. } => "build_spawn",
            SupervisorError::BuildExecution { .. } => "build_execution",
            SupervisorError::ProcessStart { .. } => "process_start",
            SupervisorError::CrashDuringProbation { .. } => "crash_during_probation",
            SupervisorError::BinaryBackup { .. } => "binary_backup",
            SupervisorError::BinaryCleanup { .. } => "binary_cleanup",
            SupervisorError::RevertRename { .. } => "revert_rename",
            SupervisorError::RevertRestart { .. } => "revert_restart",
        }
    }
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::WatchSetup { path, source } => {
                write!(f, "failed to watch {}: {}", path.display(), source)
            }
            SupervisorError::WatchStream { source } => {
                write!(f, "file watcher stopped: {}", source)
            }
            SupervisorError::BuildSpawn { command, source } => {
                write!(f, "failed to run build command `{}`: {}", command, source)
            }
            SupervisorError::BuildExecution { command, status } => {
                write!(f, "build command `{}` failed: {}", command, status)
            }
            SupervisorError::ProcessStart { path, source } => {
                write!(f, "failed to start {}: {}", path.display(), source)
            }
            SupervisorError::CrashDuringProbation { cause } => {
                write!(f, "challenger exited during probation: {}", cause)
            }
            SupervisorError::BinaryBackup { from, to, source } => write!(
                f,
                "could not preserve {} as {} (revert will be unavailable): {}",
                from.display(),
                to.display(),
                source
            ),
            SupervisorError::BinaryCleanup { path, source } => {
                write!(f, "could not remove {}: {}", path.display(), source)
            }
            SupervisorError::RevertRename { from, to, source } => write!(
                f,
                "could not restore stable binary {} -> {}: {}",
                from.display(),
                to.display(),
                source
            ),
            SupervisorError::RevertRestart { path, source } => {
                write!(f, "failed to restart stable binary {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::WatchSetup { source, .. } => Some(source),
            SupervisorError::WatchStream { source } => Some(source),
            SupervisorError::BuildSpawn { source, .. } => Some(source),
            SupervisorError::BuildExecution { .. } => None,
            SupervisorError::ProcessStart { source, .. } => Some(source),
            SupervisorError::CrashDuringProbation { cause } => match cause {
                ExitCause::Status(_) => None,
                ExitCause::Wait(e) => Some(e),
            },
            SupervisorError::BinaryBackup { source, .. } => Some(source),
            SupervisorError::BinaryCleanup { source, .. } => Some(source),
            SupervisorError::RevertRename { source, .. } => Some(source),
            SupervisorError::RevertRestart { source, .. } => Some(source),
        }
    }
}
