//! Signals emitted by the execution engine.
//!
//! The engine never waits on whoever consumes these. An `EventSink` must accept
//! an event without blocking; the stock implementation is an unbounded tokio
//! channel, which the front end drains on its own task.

use serde::Serialize;
use tokio::sync::mpsc;

/// A notification about a running command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The OS process for a command was started.
    ProcessStarted { id: String },
    /// The command's process exited and both output streams were drained.
    ProcessFinished { id: String },
    /// A line of output (stdout or stderr), or an engine-generated status line.
    NewLogEntry { id: String, line: String },
    /// An output line matched one of the command's failure patterns.
    FailureDetected { id: String },
}

impl EngineEvent {
    /// The identifier of the command this event refers to.
    pub fn id(&self) -> &str {
        match self {
            EngineEvent::ProcessStarted { id }
            | EngineEvent::ProcessFinished { id }
            | EngineEvent::NewLogEntry { id, .. }
            | EngineEvent::FailureDetected { id } => id,
        }
    }
}

/// Receiver of engine events. Fire-and-forget; implementations must not block.
///
/// `ProcessStarted` and `ProcessFinished` are emitted while the runner holds
/// its table lock, so a sink must not call back into the `Runner` (not even
/// `running_ids`) from `emit`. Forward the event and act on it elsewhere.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

impl EventSink for mpsc::UnboundedSender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        // A closed receiver just means nobody is listening anymore.
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(EngineEvent::ProcessStarted { id: "1".into() });
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::ProcessStarted { id: "1".into() }
        );
    }

    #[test]
    fn closed_channel_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.emit(EngineEvent::FailureDetected { id: "x".into() });
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = EngineEvent::NewLogEntry {
            id: "api".into(),
            line: "ready".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"new_log_entry","id":"api","line":"ready"}"#);
        assert_eq!(event.id(), "api");
    }
}
