//! Per-request reply handle.

use crate::client::Outbox;
use crate::protocol::{JoinSnapshot, ServerMessage};
use tracing::debug;

/// Acknowledgment channel for one request.
///
/// Consumed by sending, so a request is answered at most once. Dropping it
/// without sending leaves the request unanswered.
#[derive(Debug)]
pub struct Reply {
    id: u64,
    outbox: Outbox,
}

impl Reply {
    /// Reply handle for request `id`.
    pub fn new(id: u64, outbox: Outbox) -> Self {
        Self { id, outbox }
    }

    /// Acknowledge success.
    pub fn ok(self) {
        self.finish(None, None);
    }

    /// Acknowledge failure with a client-visible code.
    pub fn error(self, code: &str) {
        self.finish(Some(code.to_string()), None);
    }

    /// Acknowledge a join with its snapshot.
    pub fn snapshot(self, snapshot: JoinSnapshot) {
        self.finish(None, Some(Box::new(snapshot)));
    }

    fn finish(self, error: Option<String>, data: Option<Box<JoinSnapshot>>) {
        let ack = ServerMessage::Ack {
            id: self.id,
            error,
            data,
        };
        if let Err(e) = self.outbox.send(&ack) {
            debug!("Dropping ack {}: {}", self.id, e);
        }
    }
}
