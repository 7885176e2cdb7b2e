//! Event fan-out: NATS → WebSocket groups.
//!
//! Consumes game and chat events from NATS and republishes each one to the
//! group that should see it.

use crate::client::{ClientRegistry, Delivery, Group};
use crate::error::{GatewayError, Result};
use crate::protocol::EventFrame;
use futures::stream::BoxStream;
use futures::StreamExt;
use metrics::counter;
use nats_client::{split_event_subject, EventMessage};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Where an event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Game,
    Chat,
}

/// Every event type the gateway republishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainEventKind {
    RoundStarting,
    RoundStarted,
    RoundTick,
    RoundCrashed,
    CashedOut,
    PlayerBet,
    Message,
    ModeratorMessage,
}

/// How one event kind reaches clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Event name on the wire.
    pub name: &'static str,
    pub group: Group,
    pub delivery: Delivery,
}

impl DomainEventKind {
    /// Look up an event type published by `source`.
    pub fn parse(source: EventSource, event_type: &str) -> Option<Self> {
        use DomainEventKind::*;
        let kind = match (source, event_type) {
            (EventSource::Game, "round_starting") => RoundStarting,
            (EventSource::Game, "round_started") => RoundStarted,
            (EventSource::Game, "round_tick") => RoundTick,
            (EventSource::Game, "round_crashed") => RoundCrashed,
            (EventSource::Game, "cashed_out") => CashedOut,
            (EventSource::Game, "player_bet") => PlayerBet,
            (EventSource::Chat, "message") => Message,
            (EventSource::Chat, "moderator_message") => ModeratorMessage,
            _ => return None,
        };
        Some(kind)
    }

    pub fn route(&self) -> Route {
        use DomainEventKind::*;
        let (name, group, delivery) = match self {
            RoundStarting => ("round_starting", Group::Audience, Delivery::Reliable),
            RoundStarted => ("round_started", Group::Audience, Delivery::Reliable),
            RoundTick => ("round_tick", Group::Audience, Delivery::BestEffort),
            RoundCrashed => ("round_crashed", Group::Audience, Delivery::Reliable),
            CashedOut => ("cashed_out", Group::Audience, Delivery::Reliable),
            PlayerBet => ("player_bet", Group::Audience, Delivery::Reliable),
            Message => ("message", Group::Audience, Delivery::Reliable),
            ModeratorMessage => ("message", Group::Moderators, Delivery::Reliable),
        };
        Route {
            name,
            group,
            delivery,
        }
    }
}

/// An event with its producer-owned payload.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub kind: DomainEventKind,
    pub payload: Value,
}

impl DomainEvent {
    /// Decode a NATS message published on `<source>.events.<type>`.
    pub fn from_message(msg: &EventMessage) -> Result<Self> {
        let (source, event_type) = split_event_subject(&msg.subject)
            .ok_or_else(|| GatewayError::UnroutableSubject(msg.subject.clone()))?;
        let source = match source {
            "game" => EventSource::Game,
            "chat" => EventSource::Chat,
            _ => return Err(GatewayError::UnroutableSubject(msg.subject.clone())),
        };
        let kind = DomainEventKind::parse(source, event_type)
            .ok_or_else(|| GatewayError::UnroutableSubject(msg.subject.clone()))?;

        let payload = if msg.payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&msg.payload)?
        };
        Ok(Self { kind, payload })
    }
}

/// Republishes domain events to client groups.
pub struct EventFanout {
    registry: Arc<ClientRegistry>,
}

impl EventFanout {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize an event once and hand it to every member of its group.
    pub fn publish(&self, event: &DomainEvent) -> Result<()> {
        let route = event.kind.route();
        let frame: Arc<str> = serde_json::to_string(&EventFrame {
            event_type: route.name,
            data: &event.payload,
        })?
        .into();

        let stats = self.registry.broadcast(route.group, &frame, route.delivery);
        counter!("gateway_events_routed_total").increment(1);
        if stats.dropped > 0 && route.delivery == Delivery::BestEffort {
            counter!("gateway_ticks_dropped_total").increment(stats.dropped as u64);
        }
        debug!(
            "Routed {} to {} ({} delivered, {} dropped)",
            route.name,
            route.group.as_str(),
            stats.delivered,
            stats.dropped
        );
        Ok(())
    }

    /// Run the fan-out loop until the stream ends or shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        mut events: BoxStream<'static, EventMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!("EventFanout running");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("EventFanout received shutdown signal");
                    break;
                }

                msg = events.next() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = DomainEvent::from_message(&msg)
                                .and_then(|event| self.publish(&event))
                            {
                                warn!("Skipping event on {}: {}", msg.subject, e);
                                counter!("gateway_routing_errors_total").increment(1);
                            }
                        }
                        None => {
                            warn!("Event stream ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        info!("EventFanout stopped");
    }
}
