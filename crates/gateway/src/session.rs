//! Join handshake: identity, snapshot and group enrollment.

use crate::client::{ClientRegistry, ClientState, Group};
use crate::commands::send_error;
use crate::error::{codes, CommandError};
use crate::protocol::JoinSnapshot;
use crate::reply::Reply;
use crate::services::{ServiceError, Services, UserClass, UserRecord};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::{Uuid, Variant, Version};

/// Authenticated identity of a connection, fixed at join time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub username: String,
    pub balance_satoshis: u64,
    pub admin: bool,
    /// Admins are moderators too.
    pub moderator: bool,
}

impl Session {
    /// Derive a session and its role flags from a user record.
    pub fn from_user(user: UserRecord) -> Self {
        let admin = user.userclass == UserClass::Admin;
        Self {
            username: user.username,
            balance_satoshis: user.balance_satoshis,
            admin,
            moderator: admin || user.userclass == UserClass::Moderator,
        }
    }
}

/// Parse a one-time token, accepting only hyphenated UUID v4.
pub fn parse_one_time_token(ott: &str) -> Option<Uuid> {
    if ott.len() != 36 {
        return None;
    }
    let token = Uuid::parse_str(ott).ok()?;
    (token.get_version() == Some(Version::Random) && token.get_variant() == Variant::RFC4122)
        .then_some(token)
}

/// Tell the client why its join failed.
fn refuse(client: &ClientState, reply: Reply, err: CommandError) -> CommandError {
    match err {
        CommandError::Internal => {
            drop(reply);
            send_error(&client.outbox, codes::INTERNAL_ERROR);
        }
        _ => reply.error(err.code()),
    }
    err
}

/// Runs the join handshake for connections.
pub struct SessionGateway {
    services: Services,
    registry: Arc<ClientRegistry>,
}

impl SessionGateway {
    pub fn new(services: Services, registry: Arc<ClientRegistry>) -> Self {
        Self { services, registry }
    }

    /// Handle a connection's `join`.
    ///
    /// On success the snapshot is acknowledged, the connection is enrolled in
    /// its groups, and the session (`None` for guests) is returned. On failure
    /// the client has already been told: validation and rejection codes are
    /// acknowledged, internal failures become an unacknowledged `err` event.
    pub async fn join(
        &self,
        client: &ClientState,
        ott: Option<&str>,
        reply: Reply,
    ) -> Result<Option<Session>, CommandError> {
        let session = match self.resolve(ott).await {
            Ok(session) => session,
            Err(err) => {
                warn!("Join from {} failed: {}", client.address, err);
                return Err(refuse(client, reply, err));
            }
        };

        let snapshot = match self.snapshot(session.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(refuse(client, reply, err)),
        };
        reply.snapshot(snapshot);

        self.enroll(client, session.as_ref())?;

        counter!("gateway_joins_total").increment(1);
        info!(
            "Client joined: {} ({})",
            session.as_ref().map(|s| s.username.as_str()).unwrap_or("~guest~"),
            client.address
        );
        Ok(session)
    }

    /// Turn the optional token into a session.
    async fn resolve(&self, ott: Option<&str>) -> Result<Option<Session>, CommandError> {
        let Some(ott) = ott.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let token = parse_one_time_token(ott)
            .ok_or(CommandError::Validation(codes::INVALID_TOKEN_FORMAT))?;

        match self.services.identity.validate_one_time_token(token).await {
            Ok(user) => Ok(Some(Session::from_user(user))),
            Err(ServiceError::Rejected(code)) if code == codes::NOT_VALID_TOKEN => {
                Err(CommandError::Rejected(code))
            }
            Err(e) => {
                error!("[INTERNAL_ERROR] Unable to validate one-time token: {}", e);
                Err(CommandError::Internal)
            }
        }
    }

    /// Assemble the join snapshot for a session.
    async fn snapshot(&self, session: Option<&Session>) -> Result<JoinSnapshot, CommandError> {
        let (game, chat, table_history) = tokio::try_join!(
            self.services.engine.info(),
            self.services.chat.history(session),
            self.services.engine.table_history(),
        )
        .map_err(|e| {
            error!("[INTERNAL_ERROR] Unable to build join snapshot: {}", e);
            CommandError::Internal
        })?;

        Ok(JoinSnapshot {
            game,
            chat,
            table_history,
            username: session.map(|s| s.username.clone()),
            balance_satoshis: session.map(|s| s.balance_satoshis),
        })
    }

    fn enroll(&self, client: &ClientState, session: Option<&Session>) -> Result<(), CommandError> {
        let enroll = |group| {
            self.registry.join_group(&client.id, group).map_err(|e| {
                error!("[INTERNAL_ERROR] Unable to enroll {}: {}", client.id, e);
                CommandError::Internal
            })
        };
        enroll(Group::Audience)?;
        if session.map(|s| s.moderator).unwrap_or(false) {
            enroll(Group::Moderators)?;
        }
        Ok(())
    }
}
