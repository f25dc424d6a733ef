/// Outbound event stream consumed by the presentation layer.
///
/// Components never print; they push `Event`s into an `EventSink`. The
/// channel is unbounded and ordered per sender.
use crate::error::SupervisorError;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum Event {
    /// Coarse supervisor state ("building", "stable", ...).
    Status(String),
    /// Internal narrative of what the supervisor is doing.
    Log(String),
    /// One line of the supervised application's stdout or stderr.
    AppOutput(String),
    /// Any failure, recoverable or not.
    Error(SupervisorError),
}

impl Event {
    /// Short kind name used by the JSON presenter.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Status(_) => "status",
            Event::Log(_) => "log",
            Event::AppOutput(_) => "app_output",
            Event::Error(_) => "error",
        }
    }
}

/// Receiving half handed to the presentation layer.
pub type EventStream = mpsc::UnboundedReceiver<Event>;

/// Cloneable sending half shared by every component.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

/// Create a connected sink/stream pair.
pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

impl EventSink {
    pub fn emit(&self, event: Event) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            tracing::trace!(kind = event.kind(), "event stream closed, dropping event");
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(Event::Status(text.into()));
    }

    pub fn log(&self, text: impl Into<String>) {
        self.emit(Event::Log(text.into()));
    }

    pub fn app_output(&self, line: impl Into<String>) {
        self.emit(Event::AppOutput(line.into()));
    }

    pub fn error(&self, err: SupervisorError) {
        self.emit(Event::Error(err));
    }
}

/// Drain everything currently queued without waiting.
#[cfg(test)]
pub fn drain(stream: &mut EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = stream.try_recv() {
        events.push(event);
    }
    events
}
