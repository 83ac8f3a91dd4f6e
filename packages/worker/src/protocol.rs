//! Messages exchanged with the parent process.
//!
//! The parent sends a single `run` request; the worker answers with a
//! stream of `stdout`/`stderr`/`status` events and exactly one terminal
//! `done` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::debug;

/// A message from the parent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    /// Run one circuit. A missing or null netlist counts as empty.
    Run {
        #[serde(default)]
        netlist: Option<String>,
    },
}

impl Inbound {
    /// Interpret a structured message. Anything that is not a well-formed
    /// `run` request yields `None`.
    pub fn from_value(value: JsonValue) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    /// Parse one JSON document.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// The circuit text carried by a run request.
    pub fn into_netlist(self) -> String {
        match self {
            Inbound::Run { netlist } => netlist.unwrap_or_default(),
        }
    }
}

/// A message to the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    /// One engine standard-output line.
    Stdout { line: String },

    /// One engine error-output line.
    Stderr { line: String },

    /// Progress notice; sent once when the run starts.
    Status { message: String },

    /// The run finished. Carries the full captured logs.
    Done {
        #[serde(rename = "exitCode")]
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The run failed. Logs are attached when the engine got far enough to
    /// produce any.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
    },
}

impl Outbound {
    /// An `error` without attached logs.
    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Error {
            message: message.into(),
            stdout: None,
            stderr: None,
        }
    }

    /// Whether this message ends the conversation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outbound::Done { .. } | Outbound::Error { .. })
    }
}

/// Sending half of the channel to the parent.
///
/// Cloned into every component that reports something. Messages sent after
/// the parent has gone away are dropped.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Outbox {
    /// Create an outbox and the receiver the transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: Outbound) {
        if let Err(mpsc::error::SendError(message)) = self.tx.send(message) {
            debug!(?message, "parent channel closed; dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_run_request() {
        let msg = Inbound::parse(r#"{"type":"run","netlist":"* rc\n.end"}"#).unwrap();
        assert_eq!(msg.into_netlist(), "* rc\n.end");
    }

    #[test]
    fn run_without_netlist_is_empty() {
        let msg = Inbound::from_value(json!({"type": "run"})).unwrap();
        assert_eq!(msg.into_netlist(), "");

        let msg = Inbound::from_value(json!({"type": "run", "netlist": null})).unwrap();
        assert_eq!(msg.into_netlist(), "");
    }

    #[test]
    fn other_messages_are_ignored() {
        assert!(Inbound::from_value(json!({"type": "stop"})).is_none());
        assert!(Inbound::from_value(json!({"netlist": "x"})).is_none());
        assert!(Inbound::from_value(json!("run")).is_none());
        assert!(Inbound::from_value(json!({"type": "run", "netlist": 5})).is_none());
        assert!(Inbound::parse("{not json").is_none());
    }

    #[test]
    fn extra_fields_are_tolerated() {
        let msg = Inbound::from_value(json!({"type": "run", "netlist": "x", "id": 7}));
        assert!(msg.is_some());
    }

    #[test]
    fn done_serializes_exit_code_camel_case() {
        let done = Outbound::Done {
            exit_code: 0,
            stdout: "a\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"type": "done", "exitCode": 0, "stdout": "a\n", "stderr": ""})
        );
    }

    #[test]
    fn bare_error_omits_logs() {
        let err = Outbound::error("Netlist is empty.");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"type": "error", "message": "Netlist is empty."})
        );
    }

    #[test]
    fn event_shapes() {
        let line = Outbound::Stderr {
            line: "warning".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&line).unwrap(),
            json!({"type": "stderr", "line": "warning"})
        );
        let status = Outbound::Status {
            message: "Running simulation…".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"type": "status", "message": "Running simulation…"})
        );
        assert!(!status.is_terminal());
        assert!(Outbound::error("x").is_terminal());
    }

    #[tokio::test]
    async fn outbox_survives_closed_receiver() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        outbox.send(Outbound::error("nobody listening"));
    }
}
