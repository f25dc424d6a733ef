/// Debounce: collapse a burst of file changes into one rebuild trigger,
/// fired once the tree has been quiet for `interval` after the latest change.
use crate::event::EventSink;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One debounced request to rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildTrigger {
    /// The most recent change in the burst.
    pub last_change: PathBuf,
    /// How many change notifications the burst collapsed.
    pub changes: usize,
}

/// Pending-timer state. Every change pushes the deadline out to
/// `now + interval`; firing clears it.
#[derive(Debug)]
pub struct Debounce {
    interval: Duration,
    deadline: Option<Instant>,
    last_change: Option<PathBuf>,
    changes: usize,
}

impl Debounce {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
            last_change: None,
            changes: 0,
        }
    }

    pub fn record(&mut self, path: PathBuf, now: Instant) {
        self.deadline = Some(now + self.interval);
        self.last_change = Some(path);
        self.changes += 1;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the pending trigger if its deadline has passed.
    pub fn fire(&mut self, now: Instant) -> Option<RebuildTrigger> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                let changes = std::mem::take(&mut self.changes);
                self.last_change
                    .take()
                    .map(|last_change| RebuildTrigger {
                        last_change,
                        changes,
                    })
            }
            _ => None,
        }
    }
}

/// Debounce `changes` into `triggers` until the change stream closes.
/// A burst still pending when the stream closes is flushed after its deadline.
pub async fn run(
    mut changes: mpsc::UnboundedReceiver<PathBuf>,
    triggers: mpsc::UnboundedSender<RebuildTrigger>,
    interval: Duration,
    sink: EventSink,
) {
    let mut debounce = Debounce::new(interval);
    loop {
        let deadline = debounce.deadline();
        tokio::select! {
            change = changes.recv() => match change {
                Some(path) => {
                    sink.log(format!("file modified: {}", path.display()));
                    debounce.record(path, Instant::now());
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if !emit(&mut debounce, &triggers, &sink) {
                    return;
                }
            }
        }
    }

    if let Some(deadline) = debounce.deadline() {
        tokio::time::sleep_until(deadline).await;
        emit(&mut debounce, &triggers, &sink);
    }
}

/// Returns false once nobody is listening for triggers.
fn emit(
    debounce: &mut Debounce,
    triggers: &mpsc::UnboundedSender<RebuildTrigger>,
    sink: &EventSink,
) -> bool {
    let Some(trigger) = debounce.fire(Instant::now()) else {
        return true;
    };
    tracing::debug!(changes = trigger.changes, last = %trigger.last_change.display(), "debounce fired");
    sink.log("debounce timer fired, triggering reload");
    triggers.send(trigger).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{self, Event};

    const INTERVAL: Duration = Duration::from_millis(500);

    #[test]
    fn test_deadline_moves_with_latest_change() {
        let t0 = Instant::now();
        let mut debounce = Debounce::new(INTERVAL);
        debounce.record(PathBuf::from("a.go"), t0);
        debounce.record(PathBuf::from("b.go"), t0 + Duration::from_millis(400));
        assert_eq!(debounce.deadline(), Some(t0 + Duration::from_millis(900)));

        // Not yet: 500ms after the first change is too early.
        assert_eq!(debounce.fire(t0 + INTERVAL), None);

        let trigger = debounce.fire(t0 + Duration::from_millis(900)).unwrap();
        assert_eq!(trigger.last_change, PathBuf::from("b.go"));
        assert_eq!(trigger.changes, 2);
        assert_eq!(debounce.deadline(), None);
    }

    #[test]
    fn test_fire_clears_state() {
        let t0 = Instant::now();
        let mut debounce = Debounce::new(INTERVAL);
        assert_eq!(debounce.fire(t0), None);

        debounce.record(PathBuf::from("a.go"), t0);
        assert!(debounce.fire(t0 + INTERVAL).is_some());
        assert_eq!(debounce.fire(t0 + INTERVAL * 10), None);

        debounce.record(PathBuf::from("c.go"), t0 + INTERVAL * 10);
        let trigger = debounce.fire(t0 + INTERVAL * 11).unwrap();
        assert_eq!(trigger.changes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_yields_one_trigger_timed_from_last_change() {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
        let (sink, mut events) = event::channel();
        tokio::spawn(run(change_rx, trigger_tx, INTERVAL, sink));

        let start = Instant::now();
        for i in 0..5 {
            change_tx.send(PathBuf::from(format!("src/{i}.go"))).unwrap();
            tokio::task::yield_now().await;
            tokio::time::advance(Duration::from_millis(300)).await;
        }
        // Last change landed at +1200ms, so the trigger is due at +1700ms.
        let trigger = trigger_rx.recv().await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1700), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1800), "{elapsed:?}");
        assert_eq!(trigger.last_change, PathBuf::from("src/4.go"));
        assert_eq!(trigger.changes, 5);

        let again = tokio::time::timeout(Duration::from_secs(5), trigger_rx.recv()).await;
        assert!(again.is_err(), "a burst must fire exactly once");

        let logs: Vec<String> = event::drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                Event::Log(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(logs.iter().filter(|l| l.starts_with("file modified")).count(), 5);
        assert_eq!(
            logs.iter()
                .filter(|l| *l == "debounce timer fired, triggering reload")
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_changes_trigger_separately() {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
        let (sink, _events) = event::channel();
        tokio::spawn(run(change_rx, trigger_tx, INTERVAL, sink));

        change_tx.send(PathBuf::from("a.go")).unwrap();
        let first = trigger_rx.recv().await.unwrap();
        change_tx.send(PathBuf::from("b.go")).unwrap();
        let second = trigger_rx.recv().await.unwrap();

        assert_eq!(first.last_change, PathBuf::from("a.go"));
        assert_eq!(second.last_change, PathBuf::from("b.go"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_burst_flushed_when_changes_close() {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
        let (sink, _events) = event::channel();
        let task = tokio::spawn(run(change_rx, trigger_tx, INTERVAL, sink));

        change_tx.send(PathBuf::from("a.go")).unwrap();
        drop(change_tx);
        task.await.unwrap();

        assert_eq!(trigger_rx.recv().await.unwrap().changes, 1);
        assert!(trigger_rx.recv().await.is_none());
    }
}
