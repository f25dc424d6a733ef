/// Probation: race a fixed window against the challenger's exit.
/// Whichever completes first decides; survival is checked exactly once.
use crate::error::ExitCause;
use crate::process::ProcessHandle;
use std::time::Duration;

#[derive(Debug)]
pub enum Verdict {
    /// Still running when the window elapsed.
    Survived,
    /// Exited (for any reason, including a clean exit) before the window elapsed.
    Crashed(ExitCause),
}

/// Watch `challenger` for `window`.
pub async fn observe(challenger: &mut ProcessHandle, window: Duration) -> Verdict {
    let pid = challenger.pid();
    tracing::debug!(pid, window_ms = window.as_millis() as u64, "probation started");

    tokio::select! {
        _ = tokio::time::sleep(window) => {
            tracing::info!(pid, "challenger survived probation");
            Verdict::Survived
        }
        result = challenger.wait() => {
            let cause = match result {
                Ok(status) => ExitCause::Status(status),
                Err(e) => ExitCause::Wait(e),
            };
            tracing::warn!(pid, %cause, "challenger exited during probation");
            Verdict::Crashed(cause)
        }
    }
}
