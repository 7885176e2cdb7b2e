//! Gateway error types.

use thiserror::Error;

/// Client-visible error codes.
pub mod codes {
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const NOT_JOINED: &str = "NOT_JOINED";
    pub const NOT_LOGGED_IN: &str = "NOT_LOGGED_IN";
    pub const INVALID_TOKEN_FORMAT: &str = "INVALID_TOKEN_FORMAT";
    /// Returned verbatim by the identity service for unknown or expired tokens.
    pub const NOT_VALID_TOKEN: &str = "NOT_VALID_TOKEN";
    pub const BET_AMOUNT_NOT_INTEGER: &str = "BET_AMOUNT_NOT_INTEGER";
    pub const BET_AMOUNT_NOT_MULTIPLE_OF_100: &str = "BET_AMOUNT_NOT_MULTIPLE_OF_100";
    pub const BET_AMOUNT_TOO_LARGE: &str = "BET_AMOUNT_TOO_LARGE";
    pub const AUTO_CASH_OUT_MISSING: &str = "AUTO_CASH_OUT_MISSING";
    pub const AUTO_CASH_OUT_INVALID: &str = "AUTO_CASH_OUT_INVALID";
}

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Client not found.
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Event arrived on a subject the gateway does not route.
    #[error("Unroutable event subject: {0}")]
    UnroutableSubject(String),

    /// Channel send error.
    #[error("Channel send error")]
    ChannelSend,
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Failure of a client command, classified by who is at fault.
///
/// Every variant maps to a code that is safe to show the client; internal
/// detail is logged where the failure happens and never carried here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Malformed or out-of-range input.
    #[error("validation failed: {0}")]
    Validation(&'static str),

    /// The session lacks the role or login the command needs.
    #[error("not authorized: {0}")]
    Authorization(&'static str),

    /// Message arrived in the wrong connection state.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A collaborator refused the request with a known code.
    #[error("rejected: {0}")]
    Rejected(String),

    /// A collaborator failed in an unexpected way.
    #[error("internal error")]
    Internal,
}

impl CommandError {
    /// The code sent back to the client.
    pub fn code(&self) -> &str {
        match self {
            CommandError::Validation(code)
            | CommandError::Authorization(code)
            | CommandError::Protocol(code) => code,
            CommandError::Rejected(code) => code,
            CommandError::Internal => codes::INTERNAL_ERROR,
        }
    }
}
