/// Process supervision: start one executable in its own process group,
/// forward its output line by line, and stop it with SIGTERM followed by
/// SIGKILL after a grace period.
///
/// Signals always target the whole group so descendants the application
/// spawned go down with it.
use crate::error::SupervisorError;
use crate::event::EventSink;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// The process group a supervised process leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup(Pid);

impl ProcessGroup {
    pub fn id(&self) -> i32 {
        self.0.as_raw()
    }

    /// Send `signal` to every process in the group.
    pub fn signal(&self, signal: Signal) -> nix::Result<()> {
        killpg(self.0, signal)
    }
}

/// A running process started by [`start`].
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    group: ProcessGroup,
    path: PathBuf,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn group(&self) -> ProcessGroup {
        self.group
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited within the grace period after SIGTERM.
    Graceful,
    /// SIGKILL was needed.
    Forced,
}

/// Launch `path` with `cwd` as working directory in a new process group.
///
/// Stdout and stderr are each forwarded by their own task as
/// `Event::AppOutput`; the two streams are not ordered relative to each other.
pub fn start(path: &Path, cwd: &Path, sink: &EventSink) -> Result<ProcessHandle, SupervisorError> {
    let start_error = |source: std::io::Error| SupervisorError::ProcessStart {
        path: path.to_path_buf(),
        source,
    };
    // A relative program path is ambiguous once current_dir is set.
    let program = std::path::absolute(path).map_err(start_error)?;

    let mut child = Command::new(&program)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0) // New process group for clean kill
        .spawn()
        .map_err(start_error)?;

    let Some(pid) = child.id() else {
        return Err(start_error(std::io::Error::other(
            "process exited before its pid could be read",
        )));
    };
    // With process_group(0) the group id equals the leader's pid.
    let group = ProcessGroup(Pid::from_raw(pid as i32));

    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, sink.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, sink.clone());
    }

    tracing::info!(pid, path = %program.display(), "process started");

    Ok(ProcessHandle {
        child,
        pid,
        group,
        path: program,
    })
}

fn forward_lines<R>(reader: R, sink: EventSink)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(reader).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(mut line)) => {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    sink.app_output(String::from_utf8_lossy(&line));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "output stream closed with error");
                    break;
                }
            }
        }
    });
}

/// Stop the process in `slot`, if any.
///
/// Sends SIGTERM to the group and waits up to `grace`; if the process is
/// still alive, sends SIGKILL. The slot is always empty on return.
/// Returns None when there was nothing to stop.
pub async fn stop(
    slot: &mut Option<ProcessHandle>,
    grace: Duration,
    sink: &EventSink,
) -> Option<StopOutcome> {
    let mut handle = slot.take()?;
    let pid = handle.pid;
    sink.log(format!(
        "stopping process {} (pid {pid})",
        handle.path.display()
    ));

    if let Err(errno) = handle.group.signal(Signal::SIGTERM) {
        sink.log(format!("error sending SIGTERM ({errno}), forcing kill"));
        force_kill(&mut handle, grace).await;
        return Some(StopOutcome::Forced);
    }

    match tokio::time::timeout(grace, handle.child.wait()).await {
        Ok(result) => {
            if let Err(e) = result {
                tracing::warn!(pid, error = %e, "failed to reap stopped process");
            }
            tracing::info!(pid, "process stopped gracefully");
            sink.log("process stopped gracefully");
            Some(StopOutcome::Graceful)
        }
        Err(_) => {
            tracing::warn!(pid, grace_ms = grace.as_millis() as u64, "grace period expired");
            sink.log("process did not stop gracefully, forcing kill");
            force_kill(&mut handle, grace).await;
            Some(StopOutcome::Forced)
        }
    }
}

async fn force_kill(handle: &mut ProcessHandle, reap_timeout: Duration) {
    let pid = handle.pid;
    match handle.group.signal(Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => tracing::warn!(pid, error = %errno, "failed to SIGKILL process group"),
    }
    // The leader may have left its group; make sure it is gone too.
    let _ = handle.child.start_kill();
    match tokio::time::timeout(reap_timeout, handle.child.wait()).await {
        Ok(Ok(status)) => tracing::info!(pid, %status, "process killed"),
        Ok(Err(e)) => tracing::warn!(pid, error = %e, "failed to reap killed process"),
        Err(_) => tracing::error!(pid, "process still not reaped after SIGKILL"),
    }
}
