/// Default presentation of the event stream.
///
/// Human mode prints application output verbatim on stdout and everything
/// else through tracing (stderr). JSON mode prints one object per event on
/// stdout for an external UI to consume.
use crate::error::Severity;
use crate::event::{Event, EventStream};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// One event as written in JSON mode.
#[derive(Debug, Serialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl EventRecord {
    pub fn from_event(event: &Event, at: DateTime<Utc>) -> Self {
        let (message, severity, error_kind) = match event {
            Event::Status(s) | Event::Log(s) | Event::AppOutput(s) => (s.clone(), None, None),
            Event::Error(err) => (
                err.to_string(),
                Some(err.severity().as_str()),
                Some(err.label()),
            ),
        };
        Self {
            at,
            kind: event.kind(),
            message,
            severity,
            error_kind,
        }
    }
}

/// Render events until every sender is gone.
pub async fn render(mut events: EventStream, mode: OutputMode) {
    while let Some(event) = events.recv().await {
        match mode {
            OutputMode::Human => render_human(&event),
            OutputMode::Json => match serde_json::to_string(&EventRecord::from_event(&event, Utc::now())) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
            },
        }
    }
}

fn render_human(event: &Event) {
    match event {
        Event::AppOutput(line) => println!("{line}"),
        Event::Status(status) => tracing::info!("[{status}]"),
        Event::Log(text) => tracing::info!("{text}"),
        Event::Error(err) => match err.severity() {
            Severity::Warning => tracing::warn!(kind = err.label(), "{err}"),
            Severity::Error => tracing::error!(kind = err.label(), "{err}"),
            Severity::Critical => {
                tracing::error!(kind = err.label(), "CRITICAL: {err}; no application may be running")
            }
        },
    }
}
