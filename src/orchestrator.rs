/// Build orchestration: the only owner of the build lock and of the
/// "current stable process".
///
/// A cycle stops the stable process, moves its binary aside, builds, and
/// runs the new binary on probation. A survivor is promoted and the backup
/// dropped; anything else reverts to the backup. The lock is held for the
/// whole cycle, so cycles never overlap, and triggers that arrive while one is
/// running are dropped.
///
/// A cycle cannot be cancelled gracefully. `abort` exists for a forced exit:
/// it drops the in-flight cycle and kills the challenger's process group.
use crate::builder;
use crate::config::AegisConfig;
use crate::error::SupervisorError;
use crate::event::EventSink;
use crate::probation::{self, Verdict};
use crate::process::{self, ProcessGroup, ProcessHandle};
use crate::slot::BinarySlot;
use nix::sys::signal::Signal;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::{AbortHandle, JoinHandle};

/// State guarded by the build lock.
#[derive(Debug, Default)]
struct SupervisorState {
    stable: Option<ProcessHandle>,
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The challenger survived probation and is now stable.
    Promoted,
    /// The build command failed to run or exited non-zero.
    BuildFailed,
    /// The built binary could not be started.
    StartFailed,
    /// The challenger exited before probation elapsed.
    CrashedDuringProbation,
    /// The orchestrator was shut down; nothing was done.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    /// The backup is back in place and running.
    Restored,
    /// There was no backup; nothing is running.
    NoStableVersion,
    /// Restoring or restarting the backup failed; nothing is running.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub revert: Option<RevertOutcome>,
}

impl CycleReport {
    fn new(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            revert: None,
        }
    }

    fn reverted(outcome: CycleOutcome, revert: RevertOutcome) -> Self {
        Self {
            outcome,
            revert: Some(revert),
        }
    }
}

/// Result of asking for a build.
#[derive(Debug)]
pub enum Trigger {
    /// A cycle is now running; the handle resolves when it completes.
    Started(JoinHandle<CycleReport>),
    /// Another cycle holds the lock; the trigger was dropped.
    Busy,
}

/// What a forced abort needs to reach without taking the build lock.
#[derive(Debug, Default)]
struct InFlight {
    cycle: Option<AbortHandle>,
    challenger: Option<ProcessGroup>,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: Arc<AegisConfig>,
    slot: BinarySlot,
    sink: EventSink,
    state: Arc<Mutex<SupervisorState>>,
    in_flight: Arc<std::sync::Mutex<InFlight>>,
}

impl Orchestrator {
    pub fn new(config: Arc<AegisConfig>, sink: EventSink) -> Self {
        let slot = BinarySlot::new(config.bin_path(), config.backup_path());
        Self {
            config,
            slot,
            sink,
            state: Arc::new(Mutex::new(SupervisorState::default())),
            in_flight: Arc::default(),
        }
    }

    /// Start a build cycle unless one is already running.
    pub fn trigger_build(&self) -> Trigger {
        let guard = match Arc::clone(&self.state).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("build trigger dropped, cycle in flight");
                self.sink.log("build already in progress, ignoring trigger");
                return Trigger::Busy;
            }
        };
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_cycle(guard).await });
        self.with_in_flight(|f| f.cycle = Some(handle.abort_handle()));
        Trigger::Started(handle)
    }

    /// Drop the in-flight cycle, if any, and SIGKILL the challenger under
    /// probation. A process restored by a revert is already the stable one and
    /// is left for `shutdown`.
    pub fn abort(&self) {
        let (cycle, challenger) = self.with_in_flight(|f| (f.cycle.take(), f.challenger.take()));
        if let Some(cycle) = cycle {
            cycle.abort();
        }
        if let Some(group) = challenger {
            tracing::warn!(pgid = group.id(), "killing challenger of aborted cycle");
            if let Err(errno) = group.signal(Signal::SIGKILL) {
                tracing::debug!(error = %errno, "challenger group already empty");
            }
            self.sink.log("challenger killed, build cycle aborted");
        }
    }

    fn with_in_flight<R>(&self, f: impl FnOnce(&mut InFlight) -> R) -> R {
        let mut guard = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// True while a cycle holds the build lock.
    #[cfg(test)]
    pub fn is_building(&self) -> bool {
        self.state.try_lock().is_err()
    }

    /// Pid of the current stable process. Waits for any in-flight cycle.
    #[cfg(test)]
    pub async fn stable_pid(&self) -> Option<u32> {
        self.state.lock().await.stable.as_ref().map(|h| h.pid())
    }

    /// Wait for any in-flight cycle, refuse further cycles, and stop the
    /// stable process with the usual graceful-then-forceful sequence.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        if state.stable.is_some() {
            self.sink.log("stopping stable process");
        }
        process::stop(&mut state.stable, self.config.grace(), &self.sink).await;
        tracing::info!("orchestrator shut down");
    }

    async fn run_cycle(self, mut state: OwnedMutexGuard<SupervisorState>) -> CycleReport {
        if state.closed {
            self.sink.log("shutting down, ignoring trigger");
            return CycleReport::new(CycleOutcome::Skipped);
        }
        let report = self.cycle(&mut state).await;
        self.with_in_flight(|f| *f = InFlight::default());
        tracing::info!(outcome = ?report.outcome, revert = ?report.revert, "build cycle finished");
        report
    }

    async fn cycle(&self, state: &mut SupervisorState) -> CycleReport {
        // Free the binary file before replacing it.
        if state.stable.is_some() {
            self.sink.log("stopping stable process");
            process::stop(&mut state.stable, self.config.grace(), &self.sink).await;
        }

        match self.slot.preserve() {
            Ok(true) => self.sink.log("preserving last stable version"),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "could not preserve current binary; revert unavailable");
                self.sink.error(SupervisorError::BinaryBackup {
                    from: self.slot.binary().to_path_buf(),
                    to: self.slot.backup().to_path_buf(),
                    source: e,
                });
            }
        }

        self.sink.status("building");
        let command = &self.config.build.cmd;
        match builder::run_build(command, self.config.root()).await {
            Err(e) => {
                self.sink.error(e);
                let revert = self.revert(state);
                return CycleReport::reverted(CycleOutcome::BuildFailed, revert);
            }
            Ok(build) if !build.success() => {
                self.sink.error(SupervisorError::BuildExecution {
                    command: command.clone(),
                    status: build.status,
                });
                self.sink.log(format!("build failed:\n{}", build.output));
                let revert = self.revert(state);
                return CycleReport::reverted(CycleOutcome::BuildFailed, revert);
            }
            Ok(build) => {
                tracing::debug!(duration_ms = build.duration.as_millis() as u64, "build took");
                self.sink.log("build successful");
            }
        }

        self.sink.status("starting challenger on probation");
        let mut challenger = match process::start(self.slot.binary(), self.config.root(), &self.sink)
        {
            Ok(handle) => handle,
            Err(e) => {
                self.sink.error(e);
                let revert = self.revert(state);
                return CycleReport::reverted(CycleOutcome::StartFailed, revert);
            }
        };

        self.with_in_flight(|f| f.challenger = Some(challenger.group()));
        let verdict = probation::observe(&mut challenger, self.config.probation()).await;
        self.with_in_flight(|f| f.challenger = None);

        match verdict {
            Verdict::Survived => {
                tracing::info!(pid = challenger.pid(), path = %challenger.path().display(), "challenger promoted");
                state.stable = Some(challenger);
                if let Err(e) = self.slot.commit() {
                    tracing::warn!(error = %e, "failed to remove backup binary");
                    self.sink.error(SupervisorError::BinaryCleanup {
                        path: self.slot.backup().to_path_buf(),
                        source: e,
                    });
                }
                self.sink.log("probation successful");
                self.sink.status("stable");
                CycleReport::new(CycleOutcome::Promoted)
            }
            Verdict::Crashed(cause) => {
                // The leader is gone; take any descendants with it.
                if let Err(errno) = challenger.group().signal(Signal::SIGKILL) {
                    tracing::debug!(error = %errno, "challenger group already empty");
                }
                self.sink
                    .error(SupervisorError::CrashDuringProbation { cause });
                self.sink.log("challenger crashed during probation");
                let revert = self.revert(state);
                CycleReport::reverted(CycleOutcome::CrashedDuringProbation, revert)
            }
        }
    }

    fn revert(&self, state: &mut SupervisorState) -> RevertOutcome {
        self.sink.status("reverting to last stable version");
        self.sink.log("reverting to last stable version");

        if let Err(e) = self.slot.discard_binary() {
            tracing::warn!(error = %e, path = %self.slot.binary().display(), "failed to remove broken binary");
            self.sink.error(SupervisorError::BinaryCleanup {
                path: self.slot.binary().to_path_buf(),
                source: e,
            });
        }

        if !self.slot.has_backup() {
            state.stable = None;
            self.sink.status("no stable version available");
            return RevertOutcome::NoStableVersion;
        }

        if let Err(e) = self.slot.restore() {
            tracing::error!(error = %e, "failed to restore stable binary");
            self.sink.error(SupervisorError::RevertRename {
                from: self.slot.backup().to_path_buf(),
                to: self.slot.binary().to_path_buf(),
                source: e,
            });
            self.sink.status("could not restore stable binary");
            return RevertOutcome::Failed;
        }

        match process::start(self.slot.binary(), self.config.root(), &self.sink) {
            Ok(handle) => {
                state.stable = Some(handle);
                self.sink.log("revert successful");
                self.sink.status("stable");
                RevertOutcome::Restored
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to restart stable binary");
                let source = match e {
                    SupervisorError::ProcessStart { source, .. } => source,
                    other => std::io::Error::other(other.to_string()),
                };
                self.sink.error(SupervisorError::RevertRestart {
                    path: self.slot.binary().to_path_buf(),
                    source,
                });
                self.sink.status("failed to restart stable binary");
                RevertOutcome::Failed
            }
        }
    }
}
