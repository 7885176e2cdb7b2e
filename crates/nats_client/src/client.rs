//! NATS Core client wrapper.

use anyhow::Result;
use async_nats::Client;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::info;

/// A message received on one of the event subjects.
#[derive(Debug, Clone)]
pub struct EventMessage {
    /// Full subject the message arrived on (e.g. `game.events.round_tick`).
    pub subject: String,
    /// Raw JSON payload.
    pub payload: Bytes,
}

/// Wrapper around the NATS client.
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to a NATS server.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);
        let client = async_nats::connect(url).await?;
        Ok(Self { client })
    }

    /// Subscribe to several subject patterns and merge them into one stream.
    ///
    /// Messages from a single subject keep their publish order; there is no
    /// ordering guarantee across subjects.
    pub async fn subscribe_all(&self, subjects: &[String]) -> Result<BoxStream<'static, EventMessage>> {
        let mut subscribers = Vec::with_capacity(subjects.len());
        for subject in subjects {
            info!("Subscribing to subject pattern: {}", subject);
            subscribers.push(self.client.subscribe(subject.clone()).await?);
        }

        let merged = stream::select_all(subscribers).map(|msg| EventMessage {
            subject: msg.subject.to_string(),
            payload: msg.payload,
        });
        Ok(merged.boxed())
    }
}

/// Split an event subject into its source and event type.
///
/// `game.events.round_tick` → `("game", "round_tick")`. Returns `None` for
/// subjects that are not of the form `<source>.events.<type>`.
pub fn split_event_subject(subject: &str) -> Option<(&str, &str)> {
    let mut parts = subject.split('.');
    let source = parts.next()?;
    if parts.next()? != "events" {
        return None;
    }
    let event_type = parts.next()?;
    if source.is_empty() || event_type.is_empty() || parts.next().is_some() {
        return None;
    }
    Some((source, event_type))
}
