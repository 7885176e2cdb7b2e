//! Real-time WebSocket gateway for the crash game.
//!
//! This service:
//! - Admits WebSocket connections, at most a few per client address
//! - Runs a one-shot join handshake under a deadline
//! - Routes bets, cash-outs and chat to the domain services
//! - Parses and authorizes chat slash commands
//! - Republishes round and chat events to the groups that should see them
//!
//! ## Architecture
//!
//! ```text
//! NATS: game.events.>  chat.events.>
//!         ↓
//! EventFanout (serialize once per event)
//!         ↓
//! ClientRegistry groups (joined / moderators)
//!         ↓
//! WebSocket clients ──→ Connection ──→ SessionGateway / CommandRouter
//!                                              ↓
//!                                  GameEngine, ChatService, IdentityService
//! ```
//!
//! ## Delivery
//!
//! - Lock-free client registry using DashMap
//! - Events are pre-serialized once and shared across recipients
//! - Per-client unbounded queues; only `round_tick` is dropped when a
//!   client falls behind

pub mod admission;
pub mod backend;
pub mod chat_command;
pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod fanout;
pub mod protocol;
pub mod reply;
pub mod services;
pub mod session;
pub mod ws_server;

#[cfg(test)]
mod testing;

pub use admission::ConnectionAdmission;
pub use backend::BackendClient;
pub use client::{ClientId, ClientRegistry, ClientState};
pub use config::GatewayConfig;
pub use connection::Handlers;
pub use error::{CommandError, GatewayError, Result};
pub use fanout::EventFanout;
pub use protocol::{ClientMessage, ServerMessage};
pub use services::Services;
pub use ws_server::{create_router, AppState};
