//! Interfaces of the domain services the gateway talks to.
//!
//! The round engine, chat store and identity store live elsewhere; the gateway
//! only invokes them. Each service reports failures as [`ServiceError`]: a
//! `Rejected` code is meant for the client, anything else is internal.

use crate::chat_command::MuteDuration;
use crate::session::Session;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Failure reported by a domain service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Known, client-visible refusal (e.g. `GAME_IN_PROGRESS`).
    #[error("{0}")]
    Rejected(String),

    /// Anything else. Logged, never shown to clients.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result type for service calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Account class as stored by the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserClass {
    Admin,
    Moderator,
    #[serde(other)]
    Player,
}

/// User resolved from a one-time token.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub balance_satoshis: u64,
    pub userclass: UserClass,
}

/// Round engine.
#[async_trait]
pub trait GameEngine: Send + Sync {
    /// Current engine status for the join snapshot.
    async fn info(&self) -> ServiceResult<Map<String, Value>>;

    /// Recent round outcomes.
    async fn table_history(&self) -> ServiceResult<Vec<Value>>;

    /// Place a bet for `session` on the next round.
    async fn place_bet(&self, session: &Session, amount: u64, auto_cash_out: u64) -> ServiceResult<()>;

    /// Cash out the running bet of `session`.
    async fn cash_out(&self, session: &Session) -> ServiceResult<()>;

    /// Stop accepting new rounds.
    async fn shutdown(&self) -> ServiceResult<()>;
}

/// Chat store and moderation.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// History visible to `session` (moderators see more).
    async fn history(&self, session: Option<&Session>) -> ServiceResult<Vec<Value>>;

    /// Post a normal chat line. Delivery to other clients comes back as an event.
    async fn say(&self, session: &Session, text: &str) -> ServiceResult<()>;

    /// Mute `username`. `shadow` mutes without telling the muted user.
    async fn mute(
        &self,
        shadow: bool,
        moderator: &Session,
        username: &str,
        duration: MuteDuration,
    ) -> ServiceResult<()>;

    /// Lift a mute.
    async fn unmute(&self, moderator: &Session, username: &str) -> ServiceResult<()>;
}

/// One-time token validation.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Consume `token` and return its user, or `Rejected("NOT_VALID_TOKEN")`.
    async fn validate_one_time_token(&self, token: Uuid) -> ServiceResult<UserRecord>;
}

/// Handles to every service, shared by all connections.
#[derive(Clone)]
pub struct Services {
    pub engine: Arc<dyn GameEngine>,
    pub chat: Arc<dyn ChatService>,
    pub identity: Arc<dyn IdentityService>,
}
