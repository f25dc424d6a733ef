/// File change detection over inotify.
///
/// The tree is walked once at construction; every directory whose base name
/// is not excluded gets a watch. Exclusion is by bare name, so a nested
/// directory that shares an excluded name is skipped too, along with its
/// subtree. Directories created later are not picked up.
///
/// A blocking thread reads inotify and feeds write notifications to the
/// debounce loop, which emits one `RebuildTrigger` per burst.
use crate::debounce::{self, RebuildTrigger};
use crate::error::SupervisorError;
use crate::event::EventSink;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[cfg(target_os = "linux")]
use nix::errno::Errno;
#[cfg(target_os = "linux")]
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
#[cfg(target_os = "linux")]
use std::collections::HashMap;

/// What the reader thread reports.
#[derive(Debug)]
enum RawEvent {
    Write(PathBuf),
    /// The kernel queue overflowed; changes were lost.
    Overflow,
    Failed(std::io::Error),
}

#[cfg(target_os = "linux")]
pub struct ChangeDetector {
    root: PathBuf,
    inotify: Inotify,
    watches: HashMap<WatchDescriptor, PathBuf>,
}

#[cfg(target_os = "linux")]
impl ChangeDetector {
    /// Watch `root` and every non-excluded directory below it.
    pub fn new(root: &Path, excluded: &[String]) -> Result<Self, SupervisorError> {
        let setup_error = |errno: Errno| SupervisorError::WatchSetup {
            path: root.to_path_buf(),
            source: errno.into(),
        };
        let inotify = Inotify::init(InitFlags::IN_CLOEXEC).map_err(setup_error)?;
        let mut watches = HashMap::new();
        let root_wd = inotify
            .add_watch(root, AddWatchFlags::IN_MODIFY)
            .map_err(setup_error)?;
        watches.insert(root_wd, root.to_path_buf());

        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "failed to read directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                // file_type() does not follow symlinks, so linked trees are not walked.
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }
                let name = entry.file_name();
                if is_excluded(&name.to_string_lossy(), excluded) {
                    tracing::debug!(path = %entry.path().display(), "skipping excluded directory");
                    continue;
                }
                let path = entry.path();
                match inotify.add_watch(path.as_path(), AddWatchFlags::IN_MODIFY) {
                    Ok(wd) => {
                        watches.insert(wd, path.clone());
                    }
                    Err(errno) => {
                        tracing::warn!(path = %path.display(), error = %errno, "failed to watch directory");
                    }
                }
                pending.push(path);
            }
        }

        tracing::info!(root = %root.display(), directories = watches.len(), "watching for file changes");
        Ok(Self {
            root: root.to_path_buf(),
            inotify,
            watches,
        })
    }

    /// Watched directories, sorted.
    #[cfg(test)]
    pub fn watched_dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = self.watches.values().map(PathBuf::as_path).collect();
        dirs.sort();
        dirs
    }

    /// Start the reader thread and the debounce loop. Triggers go to
    /// `triggers`; narrative and failures go to `sink`.
    pub fn spawn(
        self,
        interval: Duration,
        triggers: mpsc::UnboundedSender<RebuildTrigger>,
        sink: EventSink,
    ) -> JoinHandle<()> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let Self {
            root,
            inotify,
            watches,
        } = self;
        std::thread::spawn(move || read_loop(inotify, watches, raw_tx));
        tokio::spawn(forward(root, raw_rx, interval, triggers, sink))
    }
}

#[cfg(target_os = "linux")]
fn read_loop(
    inotify: Inotify,
    watches: HashMap<WatchDescriptor, PathBuf>,
    tx: mpsc::UnboundedSender<RawEvent>,
) {
    loop {
        let events = match inotify.read_events() {
            Ok(events) => events,
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                let _ = tx.send(RawEvent::Failed(errno.into()));
                return;
            }
        };
        for event in events {
            let raw = if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                RawEvent::Overflow
            } else if event.mask.contains(AddWatchFlags::IN_MODIFY) {
                let Some(dir) = watches.get(&event.wd) else {
                    continue;
                };
                match &event.name {
                    Some(name) => RawEvent::Write(dir.join(name)),
                    None => RawEvent::Write(dir.clone()),
                }
            } else {
                continue;
            };
            if tx.send(raw).is_err() {
                // Detector task is gone.
                return;
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub struct ChangeDetector {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl ChangeDetector {
    pub fn new(root: &Path, _excluded: &[String]) -> Result<Self, SupervisorError> {
        Err(SupervisorError::WatchSetup {
            path: root.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "file watching requires inotify (Linux)",
            ),
        })
    }

    pub fn spawn(
        self,
        _interval: Duration,
        _triggers: mpsc::UnboundedSender<RebuildTrigger>,
        _sink: EventSink,
    ) -> JoinHandle<()> {
        tokio::spawn(async {})
    }
}

/// Translate reader-thread events for the debounce loop. Ends when the
/// watcher fails; the debounce loop then flushes and ends too.
async fn forward(
    root: PathBuf,
    mut raw: mpsc::UnboundedReceiver<RawEvent>,
    interval: Duration,
    triggers: mpsc::UnboundedSender<RebuildTrigger>,
    sink: EventSink,
) {
    let (change_tx, change_rx) = mpsc::unbounded_channel();
    let debouncer = tokio::spawn(debounce::run(change_rx, triggers, interval, sink.clone()));

    while let Some(event) = raw.recv().await {
        let path = match event {
            RawEvent::Write(path) => path,
            RawEvent::Overflow => {
                tracing::warn!("inotify queue overflow");
                sink.log("watch queue overflowed, some changes may have been missed");
                root.clone()
            }
            RawEvent::Failed(e) => {
                tracing::error!(error = %e, "file watcher failed");
                sink.error(SupervisorError::WatchStream { source: e });
                break;
            }
        };
        if change_tx.send(path).is_err() {
            break;
        }
    }

    drop(change_tx);
    let _ = debouncer.await;
}

fn is_excluded(name: &str, excluded: &[String]) -> bool {
    excluded.iter().any(|e| e == name)
}
