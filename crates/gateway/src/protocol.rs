//! WebSocket protocol message types.
//!
//! Defines the JSON message format for client-server communication. Every
//! frame is a JSON object tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Message sent from client to server.
///
/// `join`, `place_bet` and `cash_out` carry a request `id`; the reply is an
/// [`ServerMessage::Ack`] echoing it. `say` is never acknowledged.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One-shot handshake, optionally carrying a one-time token.
    Join {
        id: Option<u64>,
        ott: Option<String>,
    },
    /// Place a bet for the next round.
    PlaceBet {
        id: Option<u64>,
        /// Bet size in satoshis. Kept as raw JSON so a wrong type is
        /// reported as a validation error instead of failing to parse.
        amount: Option<Value>,
        /// Auto cash-out multiplier, in hundredths (150 = 1.50x).
        auto_cash_out: Option<Value>,
    },
    /// Cash out the current bet.
    CashOut { id: Option<u64> },
    /// Chat message or slash command. Non-string text counts as missing.
    Say { text: Option<Value> },
    /// Ping message for keepalive.
    Ping,
}

impl ClientMessage {
    /// Command name used in logs, metrics and `err` descriptions.
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::PlaceBet { .. } => "place_bet",
            ClientMessage::CashOut { .. } => "cash_out",
            ClientMessage::Say { .. } => "say",
            ClientMessage::Ping => "ping",
        }
    }
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Message sent from server to a single client.
///
/// Broadcast events are not listed here; they are serialized once per event
/// as an [`EventFrame`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a request carrying an `id`.
    Ack {
        id: u64,
        /// `null` on success, otherwise an error code.
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Box<JoinSnapshot>>,
    },
    /// Protocol-level error.
    Err { description: String },
    /// Error shown inline in the chat stream of the sender only.
    #[serde(rename = "message")]
    ChatError { data: ChatNotice },
    /// Pong response to ping.
    Pong,
}

/// Chat-formatted error line.
#[derive(Debug, Clone, Serialize)]
pub struct ChatNotice {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl ChatNotice {
    /// An error line stamped with the current time.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            kind: "error",
            message: message.into(),
        }
    }
}

/// State handed to a client when its join succeeds.
#[derive(Debug, Clone, Serialize)]
pub struct JoinSnapshot {
    /// Current engine status, merged at the top level.
    #[serde(flatten)]
    pub game: Map<String, Value>,
    /// Chat history visible to the caller's role.
    pub chat: Vec<Value>,
    /// Recent round outcomes.
    pub table_history: Vec<Value>,
    pub username: Option<String>,
    pub balance_satoshis: Option<u64>,
}

/// A broadcast event as it goes on the wire.
#[derive(Debug, Serialize)]
pub struct EventFrame<'a> {
    #[serde(rename = "type")]
    pub event_type: &'a str,
    pub data: &'a Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_place_bet() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"place_bet","id":7,"amount":500,"auto_cash_out":150}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::PlaceBet {
                id,
                amount,
                auto_cash_out,
            } => {
                assert_eq!(id, Some(7));
                assert_eq!(amount.unwrap().as_u64(), Some(500));
                assert_eq!(auto_cash_out.unwrap().as_u64(), Some(150));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_wrongly_typed_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"place_bet","id":7,"amount":"500","auto_cash_out":null}"#)
                .unwrap();
        assert!(matches!(
            msg,
            ClientMessage::PlaceBet { amount: Some(Value::String(_)), auto_cash_out: None, .. }
        ));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"say","text":42}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Say { text: Some(Value::Number(_)) }));
    }

    #[test]
    fn test_parse_join_without_token() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"join","id":1}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Join { id: Some(1), ott: None }));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"withdraw"}"#).is_err());
    }

    #[test]
    fn test_ack_serialization() {
        let ok = serde_json::to_value(ServerMessage::Ack {
            id: 3,
            error: None,
            data: None,
        })
        .unwrap();
        assert_eq!(ok, json!({"type": "ack", "id": 3, "error": null}));

        let err = serde_json::to_value(ServerMessage::Ack {
            id: 4,
            error: Some("BET_AMOUNT_TOO_LARGE".into()),
            data: None,
        })
        .unwrap();
        assert_eq!(err["error"], "BET_AMOUNT_TOO_LARGE");
    }

    #[test]
    fn test_chat_error_is_a_message_frame() {
        let value = serde_json::to_value(ServerMessage::ChatError {
            data: ChatNotice::error("Not a moderator."),
        })
        .unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["data"]["type"], "error");
        assert_eq!(value["data"]["message"], "Not a moderator.");
    }

    #[test]
    fn test_snapshot_flattens_game_info() {
        let mut game = Map::new();
        game.insert("state".into(), json!("IN_PROGRESS"));
        let snapshot = JoinSnapshot {
            game,
            chat: vec![],
            table_history: vec![json!({"game_crash": 123})],
            username: Some("alice".into()),
            balance_satoshis: Some(10_000),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["state"], "IN_PROGRESS");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["table_history"][0]["game_crash"], 123);
    }
}
