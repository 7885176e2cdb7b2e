//! NATS client used by the gateway to follow game and chat events.
//!
//! The round engine publishes on `game.events.<type>` and the chat service on
//! `chat.events.<type>`; the gateway only ever subscribes.

mod client;

pub use client::{split_event_subject, EventMessage, NatsClient};
