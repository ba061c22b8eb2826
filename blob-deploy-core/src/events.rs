//! Progress events emitted while deploying.
//!
//! Every event renders to the ordered field list the deploy log has always
//! used, e.g. `["Uploading", "pre/app.js", "encoding", "gzip"]`, so callers can
//! match on literal records. [`TracingSink`] forwards events to `tracing`,
//! [`RecordingSink`] keeps them in memory.

use std::sync::Mutex;
use tracing::{error, info, warn};

pub const CWD_DEPRECATION: &str = "[WARNING] `cwd` is deprecated. please use `base` in your files";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEvent {
    /// A blob under the prefix is about to be removed.
    Deleting { name: String },
    Deleted { name: String },
    DeleteFailed { name: String },
    /// A file is about to be uploaded. `encoding` is `None` for uncompressed payloads.
    Uploading { key: String, encoding: Option<String> },
    Uploaded { key: String, container: String },
    CwdDeprecated,
}

impl DeployEvent {
    /// Literal ordered fields of this event.
    pub fn fields(&self) -> Vec<String> {
        match self {
            DeployEvent::Deleting { name } => vec!["deleting".into(), name.clone()],
            DeployEvent::Deleted { name } => vec!["deleted".into(), name.clone()],
            DeployEvent::DeleteFailed { name } => {
                vec!["Error while deleting blob".into(), name.clone()]
            }
            DeployEvent::Uploading { key, encoding } => vec![
                "Uploading".into(),
                key.clone(),
                "encoding".into(),
                encoding.clone().unwrap_or_default(),
            ],
            DeployEvent::Uploaded { key, container } => vec![
                "Uploaded".into(),
                key.clone(),
                "to".into(),
                container.clone(),
            ],
            DeployEvent::CwdDeprecated => vec![CWD_DEPRECATION.into()],
        }
    }
}

impl std::fmt::Display for DeployEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = self.fields();
        let rendered: Vec<&str> = fields
            .iter()
            .map(String::as_str)
            .filter(|field| !field.is_empty())
            .collect();
        write!(f, "{}", rendered.join(" "))
    }
}

/// Receiver of deploy progress events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DeployEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DeployEvent) {
        match &event {
            DeployEvent::CwdDeprecated => warn!(event = %event, "[DEPLOY] deprecated option"),
            DeployEvent::DeleteFailed { name } => {
                error!(blob = %name, event = %event, "[PREPARE] delete failed")
            }
            _ => info!(event = %event, "[DEPLOY] progress"),
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DeployEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DeployEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn records(&self) -> Vec<Vec<String>> {
        self.events().iter().map(DeployEvent::fields).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: DeployEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: DeployEvent) {}
}

impl<S: EventSink + ?Sized> EventSink for &S {
    fn emit(&self, event: DeployEvent) {
        (**self).emit(event)
    }
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: DeployEvent) {
        (**self).emit(event)
    }
}
