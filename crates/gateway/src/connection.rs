//! Per-connection state machine.
//!
//! A connection starts in `NEW` and must send `join` before its deadline.
//! After a successful join it is `JOINED` and its commands are routed; a
//! failed join or an expired deadline closes it.

use crate::client::{ClientRegistry, ClientState};
use crate::commands::{send_error, CommandRouter};
use crate::error::{codes, CommandError};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::reply::Reply;
use crate::services::Services;
use crate::session::{Session, SessionGateway};
use futures::{Stream, StreamExt};
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Default time a connection has to send `join`.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(6000);

/// Why a connection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away.
    ClientClosed,
    /// No `join` before the deadline.
    JoinTimeout,
    /// The join handshake failed.
    JoinFailed,
}

/// Handlers shared by every connection.
pub struct Handlers {
    sessions: SessionGateway,
    commands: CommandRouter,
    join_timeout: Duration,
}

impl Handlers {
    pub fn new(services: Services, registry: Arc<ClientRegistry>, join_timeout: Duration) -> Self {
        Self {
            sessions: SessionGateway::new(services.clone(), registry),
            commands: CommandRouter::new(services),
            join_timeout,
        }
    }
}

enum Phase {
    New,
    /// `None` for guests.
    Joined(Option<Session>),
}

/// Outcome of handling a message before `join` succeeded.
enum PreJoin {
    Waiting,
    Joined(Option<Session>),
    Failed,
}

/// One client connection, driven by its inbound text frames.
pub struct Connection {
    client: Arc<ClientState>,
    handlers: Arc<Handlers>,
    deadline: Instant,
    phase: Phase,
}

impl Connection {
    /// Start the join deadline now.
    pub fn new(client: Arc<ClientState>, handlers: Arc<Handlers>) -> Self {
        let deadline = Instant::now() + handlers.join_timeout;
        Self {
            client,
            handlers,
            deadline,
            phase: Phase::New,
        }
    }

    /// Process inbound frames until the client leaves or is closed.
    ///
    /// Frames are handled one at a time, in arrival order.
    pub async fn run<S>(mut self, mut incoming: S) -> CloseReason
    where
        S: Stream<Item = String> + Unpin,
    {
        while matches!(self.phase, Phase::New) {
            tokio::select! {
                biased;

                _ = sleep_until(self.deadline) => {
                    info!("Client {} did not join in time, closing", self.client.id);
                    counter!("gateway_join_timeouts_total").increment(1);
                    self.client.outbox.close();
                    return CloseReason::JoinTimeout;
                }

                text = incoming.next() => {
                    let Some(text) = text else {
                        return CloseReason::ClientClosed;
                    };
                    match self.handle_pre_join(&text).await {
                        PreJoin::Waiting => {}
                        PreJoin::Joined(session) => self.phase = Phase::Joined(session),
                        PreJoin::Failed => {
                            self.client.outbox.close();
                            return CloseReason::JoinFailed;
                        }
                    }
                }
            }
        }

        while let Some(text) = incoming.next().await {
            self.handle_joined(&text).await;
        }
        CloseReason::ClientClosed
    }

    async fn handle_pre_join(&self, text: &str) -> PreJoin {
        let Some(msg) = self.parse(text) else {
            // A join that does not parse still uses up the handshake.
            return if is_join_attempt(text) {
                PreJoin::Failed
            } else {
                PreJoin::Waiting
            };
        };
        let name = msg.name();
        let not_joined = CommandError::Protocol(codes::NOT_JOINED);

        match msg {
            ClientMessage::Join { id, ott } => {
                let Some(reply) = self.reply(id, "join") else {
                    return PreJoin::Failed;
                };
                match self
                    .handlers
                    .sessions
                    .join(&self.client, ott.as_deref(), reply)
                    .await
                {
                    Ok(session) => PreJoin::Joined(session),
                    Err(_) => PreJoin::Failed,
                }
            }
            ClientMessage::PlaceBet { id, .. } | ClientMessage::CashOut { id } => {
                if let Some(reply) = id.map(|id| Reply::new(id, self.client.outbox.clone())) {
                    reply.error(not_joined.code());
                } else {
                    send_error(&self.client.outbox, &format!("[{}] {}", name, not_joined.code()));
                }
                PreJoin::Waiting
            }
            ClientMessage::Say { .. } => {
                send_error(&self.client.outbox, &format!("[{}] {}", name, not_joined.code()));
                PreJoin::Waiting
            }
            ClientMessage::Ping => {
                self.pong();
                PreJoin::Waiting
            }
        }
    }

    async fn handle_joined(&self, text: &str) {
        let Phase::Joined(session) = &self.phase else {
            return;
        };
        let Some(msg) = self.parse(text) else {
            return;
        };
        let commands = &self.handlers.commands;

        match msg {
            ClientMessage::Join { .. } => {
                debug!("Ignoring repeated join from {}", self.client.id);
            }
            ClientMessage::PlaceBet {
                id,
                amount,
                auto_cash_out,
            } => {
                if let Some(reply) = self.reply(id, "place_bet") {
                    commands
                        .place_bet(session.as_ref(), amount.as_ref(), auto_cash_out.as_ref(), reply)
                        .await;
                }
            }
            ClientMessage::CashOut { id } => {
                if let Some(reply) = self.reply(id, "cash_out") {
                    commands.cash_out(session.as_ref(), reply).await;
                }
            }
            ClientMessage::Say { text } => {
                commands
                    .say(session.as_ref(), text.as_ref().and_then(Value::as_str), &self.client.outbox)
                    .await;
            }
            ClientMessage::Ping => self.pong(),
        }
    }

    fn parse(&self, text: &str) -> Option<ClientMessage> {
        match serde_json::from_str(text) {
            Ok(msg) => Some(msg),
            Err(e) => {
                debug!("Invalid message from {}: {}", self.client.id, e);
                send_error(&self.client.outbox, "[protocol] invalid message");
                None
            }
        }
    }

    /// Reply handle for a request, or an `err` event if it carries no id.
    fn reply(&self, id: Option<u64>, command: &str) -> Option<Reply> {
        match id {
            Some(id) => Some(Reply::new(id, self.client.outbox.clone())),
            None => {
                send_error(&self.client.outbox, &format!("[{}] No ack", command));
                None
            }
        }
    }

    fn pong(&self) {
        if let Err(e) = self.client.send(&ServerMessage::Pong) {
            debug!("Failed to send pong to {}: {}", self.client.id, e);
        }
    }
}

/// Whether a frame that failed to parse was meant as a `join`.
fn is_join_attempt(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| value.get("type")?.as_str().map(|kind| kind == "join"))
        .unwrap_or(false)
}
