//! Observability port. Every major branch of the send/poll workflow emits
//! a structured event; the default sink appends JSONL so a receipt-format
//! failure can be diagnosed after the fact without reproducing the call.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub timestamp: String,
    pub event_type: String,
    pub external_id: String,
    pub filename: Option<String>,
    pub ticket: Option<String>,
    pub state: Option<String>,
    pub xml_sha256: Option<String>,
    pub error: Option<String>,
}

impl DispatchEvent {
    pub fn new(event_type: &str, external_id: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            external_id: external_id.to_string(),
            filename: None,
            ticket: None,
            state: None,
            xml_sha256: None,
            error: None,
        }
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn with_ticket(mut self, ticket: &str) -> Self {
        self.ticket = Some(ticket.to_string());
        self
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = Some(state.to_string());
        self
    }

    pub fn with_hash(mut self, hash: String) -> Self {
        self.xml_sha256 = Some(hash);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Injected event sink. Emitting must never fail the business flow, so the
/// signature is infallible and sinks swallow their own I/O problems.
pub trait DispatchEvents: Send + Sync {
    fn emit(&self, event: &DispatchEvent);
}

pub struct JsonlAudit {
    path: PathBuf,
}

impl JsonlAudit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, event: &DispatchEvent) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(event).map_err(std::io::Error::other)?;
        writeln!(file, "{}", json)
    }
}

impl DispatchEvents for JsonlAudit {
    fn emit(&self, event: &DispatchEvent) {
        if let Err(err) = self.append(event) {
            tracing::warn!(error = %err, "audit event dropped");
            return;
        }
        tracing::debug!(event_type = %event.event_type, external_id = %event.external_id, "audit event written");
    }
}

/// Sink for tests and callers that do not keep an audit trail.
#[derive(Default)]
pub struct NoopEvents;

impl DispatchEvents for NoopEvents {
    fn emit(&self, _event: &DispatchEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let audit = JsonlAudit::new(&path);

        audit.emit(
            &DispatchEvent::new("dispatch_submitted", "ext-1")
                .with_filename("DOC-1")
                .with_ticket("1609")
                .with_state("03"),
        );
        audit.emit(&DispatchEvent::new("status_in_process", "ext-1"));

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: DispatchEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event_type, "dispatch_submitted");
        assert_eq!(first.ticket.as_deref(), Some("1609"));
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
