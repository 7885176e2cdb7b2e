//! Validation and dispatch of in-game commands.

use crate::chat_command::{self, ChatCommand};
use crate::client::Outbox;
use crate::error::{codes, CommandError};
use crate::protocol::{ChatNotice, ServerMessage};
use crate::reply::Reply;
use crate::services::{ServiceError, Services};
use crate::session::Session;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Largest accepted bet, in satoshis (1 BTC).
pub const MAX_BET_SATOSHIS: u64 = 100_000_000;

/// Smallest accepted auto cash-out (1.00x).
pub const MIN_AUTO_CASH_OUT: u64 = 100;

/// Longest accepted chat line, in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Send a protocol-level `err` event to one client.
pub fn send_error(outbox: &Outbox, description: &str) {
    warn!("Sending client error: {}", description);
    let _ = outbox.send(&ServerMessage::Err {
        description: description.to_string(),
    });
}

/// Send an error line into one client's chat stream.
pub fn send_chat_error(outbox: &Outbox, message: impl Into<String>) {
    let message = message.into();
    warn!("Sending client chat error: {}", message);
    let _ = outbox.send(&ServerMessage::ChatError {
        data: ChatNotice::error(message),
    });
}

/// Integer value of a JSON number; floats count only if they have no fraction.
/// Anything that is not a number has no integer value.
fn as_integer(value: &Value) -> Option<i128> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return Some(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(i128::from(u));
    }
    n.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i128)
}

/// Check a bet request and return `(amount, auto_cash_out)`.
pub fn validate_bet(
    amount: Option<&Value>,
    auto_cash_out: Option<&Value>,
) -> Result<(u64, u64), CommandError> {
    let amount = amount
        .and_then(as_integer)
        .ok_or(CommandError::Validation(codes::BET_AMOUNT_NOT_INTEGER))?;
    if amount <= 0 || amount % 100 != 0 {
        return Err(CommandError::Validation(codes::BET_AMOUNT_NOT_MULTIPLE_OF_100));
    }
    if amount > i128::from(MAX_BET_SATOSHIS) {
        return Err(CommandError::Validation(codes::BET_AMOUNT_TOO_LARGE));
    }

    let auto_cash_out = auto_cash_out.ok_or(CommandError::Validation(codes::AUTO_CASH_OUT_MISSING))?;
    let auto_cash_out = as_integer(auto_cash_out)
        .filter(|v| *v >= i128::from(MIN_AUTO_CASH_OUT))
        .and_then(|v| u64::try_from(v).ok())
        .ok_or(CommandError::Validation(codes::AUTO_CASH_OUT_INVALID))?;

    Ok((amount as u64, auto_cash_out))
}

/// Session of a logged-in user, or `NOT_LOGGED_IN` for guests.
fn require_login(session: Option<&Session>) -> Result<&Session, CommandError> {
    session.ok_or(CommandError::Authorization(codes::NOT_LOGGED_IN))
}

/// Classify an engine failure, logging internal ones.
fn engine_error(e: ServiceError, action: &str, session: &Session) -> CommandError {
    match e {
        ServiceError::Rejected(code) => CommandError::Rejected(code),
        ServiceError::Internal(e) => {
            error!("[INTERNAL_ERROR] Unable to {} for {}: {}", action, session.username, e);
            CommandError::Internal
        }
    }
}

/// Routes joined connections' commands to the domain services.
pub struct CommandRouter {
    services: Services,
}

impl CommandRouter {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Place a bet. Always acknowledged.
    pub async fn place_bet(
        &self,
        session: Option<&Session>,
        amount: Option<&Value>,
        auto_cash_out: Option<&Value>,
        reply: Reply,
    ) {
        counter!("gateway_commands_total", "command" => "place_bet").increment(1);

        match self.try_place_bet(session, amount, auto_cash_out).await {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.code()),
        }
    }

    async fn try_place_bet(
        &self,
        session: Option<&Session>,
        amount: Option<&Value>,
        auto_cash_out: Option<&Value>,
    ) -> Result<(), CommandError> {
        let session = require_login(session)?;
        let (amount, auto_cash_out) = validate_bet(amount, auto_cash_out)
            .inspect_err(|e| debug!("Rejected bet from {}: {}", session.username, e))?;

        self.services
            .engine
            .place_bet(session, amount, auto_cash_out)
            .await
            .map_err(|e| engine_error(e, "place bet", session))
    }

    /// Cash out the running bet.
    ///
    /// Unlike `place_bet`, an internal engine failure is only logged and the
    /// request is left unanswered; clients have to tolerate a missing ack.
    pub async fn cash_out(&self, session: Option<&Session>, reply: Reply) {
        counter!("gateway_commands_total", "command" => "cash_out").increment(1);

        let result = match require_login(session) {
            Ok(session) => self
                .services
                .engine
                .cash_out(session)
                .await
                .map_err(|e| engine_error(e, "cash out", session)),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => reply.ok(),
            Err(CommandError::Internal) => drop(reply),
            Err(e) => reply.error(e.code()),
        }
    }

    /// Post a chat line or run a slash command. Never acknowledged.
    pub async fn say(&self, session: Option<&Session>, text: Option<&str>, outbox: &Outbox) {
        counter!("gateway_commands_total", "command" => "say").increment(1);

        let Some(session) = session else {
            return send_error(outbox, "[say] not logged in");
        };
        let Some(text) = text else {
            return send_error(outbox, "[say] no message");
        };
        let len = text.chars().count();
        if len == 0 || len > MAX_MESSAGE_CHARS {
            return send_error(outbox, "[say] invalid message size");
        }

        if let Some(command) = ChatCommand::parse(text) {
            if let Some(message) = chat_command::execute(command, session, &self.services).await {
                send_chat_error(outbox, message);
            }
            return;
        }

        match self.services.chat.say(session, text).await {
            Ok(()) => {}
            Err(ServiceError::Rejected(message)) => send_chat_error(outbox, message),
            Err(e) => error!("[INTERNAL_ERROR] Unable to post chat from {}: {}", session.username, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OutboxReceiver;
    use crate::services::UserClass;
    use crate::testing::{drain, fixture, session, Fixture, Outcome};
    use serde_json::json;

    fn num(v: i64) -> Value {
        json!(v)
    }

    fn setup() -> (Fixture, CommandRouter, Outbox, OutboxReceiver) {
        let fx = fixture();
        let router = CommandRouter::new(fx.services.clone());
        let (outbox, rx) = Outbox::channel(16);
        (fx, router, outbox, rx)
    }

    #[test]
    fn test_validate_bet() {
        let check = |amount: i64, auto: i64| validate_bet(Some(&num(amount)), Some(&num(auto)));

        assert_eq!(
            check(250, 300),
            Err(CommandError::Validation(codes::BET_AMOUNT_NOT_MULTIPLE_OF_100))
        );
        assert_eq!(
            check(1000, 50),
            Err(CommandError::Validation(codes::AUTO_CASH_OUT_INVALID))
        );
        assert_eq!(
            check(100_000_001, 200),
            Err(CommandError::Validation(codes::BET_AMOUNT_NOT_MULTIPLE_OF_100))
        );
        assert_eq!(
            check(100_000_100, 200),
            Err(CommandError::Validation(codes::BET_AMOUNT_TOO_LARGE))
        );
        assert_eq!(
            check(0, 200),
            Err(CommandError::Validation(codes::BET_AMOUNT_NOT_MULTIPLE_OF_100))
        );
        assert_eq!(
            check(-100, 200),
            Err(CommandError::Validation(codes::BET_AMOUNT_NOT_MULTIPLE_OF_100))
        );
        assert_eq!(check(500, 150), Ok((500, 150)));
        assert_eq!(check(100_000_000, 100), Ok((100_000_000, 100)));
    }

    #[test]
    fn test_validate_bet_non_integers() {
        let fractional = json!(150.5);
        let whole = json!(1000.0);

        assert_eq!(
            validate_bet(Some(&fractional), Some(&num(200))),
            Err(CommandError::Validation(codes::BET_AMOUNT_NOT_INTEGER))
        );
        assert_eq!(
            validate_bet(None, Some(&num(200))),
            Err(CommandError::Validation(codes::BET_AMOUNT_NOT_INTEGER))
        );
        assert_eq!(
            validate_bet(Some(&num(500)), None),
            Err(CommandError::Validation(codes::AUTO_CASH_OUT_MISSING))
        );
        assert_eq!(
            validate_bet(Some(&num(500)), Some(&fractional)),
            Err(CommandError::Validation(codes::AUTO_CASH_OUT_INVALID))
        );
        assert_eq!(validate_bet(Some(&whole), Some(&num(200))), Ok((1000, 200)));
    }

    #[test]
    fn test_validate_bet_wrong_types() {
        assert_eq!(
            validate_bet(Some(&json!("500")), Some(&num(200))),
            Err(CommandError::Validation(codes::BET_AMOUNT_NOT_INTEGER))
        );
        assert_eq!(
            validate_bet(Some(&json!([500])), Some(&num(200))),
            Err(CommandError::Validation(codes::BET_AMOUNT_NOT_INTEGER))
        );
        assert_eq!(
            validate_bet(Some(&num(500)), Some(&json!("150"))),
            Err(CommandError::Validation(codes::AUTO_CASH_OUT_INVALID))
        );
        assert_eq!(
            validate_bet(Some(&num(500)), Some(&json!(true))),
            Err(CommandError::Validation(codes::AUTO_CASH_OUT_INVALID))
        );
    }

    #[tokio::test]
    async fn test_place_bet_success() {
        let (fx, router, outbox, mut rx) = setup();
        let player = session("joe", UserClass::Player);

        router
            .place_bet(Some(&player), Some(&num(500)), Some(&num(150)), Reply::new(2, outbox))
            .await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["id"], 2);
        assert_eq!(frames[0]["error"], Value::Null);
        assert_eq!(
            fx.engine.bets.lock().unwrap().as_slice(),
            &[("joe".to_string(), 500, 150)]
        );
    }

    #[tokio::test]
    async fn test_invalid_bet_never_reaches_engine() {
        let (fx, router, outbox, mut rx) = setup();
        let player = session("joe", UserClass::Player);

        router
            .place_bet(Some(&player), Some(&num(250)), Some(&num(300)), Reply::new(3, outbox))
            .await;

        assert_eq!(drain(&mut rx)[0]["error"], "BET_AMOUNT_NOT_MULTIPLE_OF_100");
        assert!(fx.engine.bets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_place_bet_engine_errors() {
        let (fx, router, outbox, mut rx) = setup();
        let player = session("joe", UserClass::Player);

        *fx.engine.bet_outcome.lock().unwrap() = Outcome::Rejected("GAME_IN_PROGRESS");
        router
            .place_bet(Some(&player), Some(&num(500)), Some(&num(150)), Reply::new(4, outbox.clone()))
            .await;
        assert_eq!(drain(&mut rx)[0]["error"], "GAME_IN_PROGRESS");

        *fx.engine.bet_outcome.lock().unwrap() = Outcome::Internal;
        router
            .place_bet(Some(&player), Some(&num(500)), Some(&num(150)), Reply::new(5, outbox))
            .await;
        let frames = drain(&mut rx);
        assert_eq!(frames[0]["error"], "INTERNAL_ERROR");
        assert!(!frames[0].to_string().contains("exploded"));
    }

    #[tokio::test]
    async fn test_guest_cannot_bet() {
        let (fx, router, outbox, mut rx) = setup();
        router
            .place_bet(None, Some(&num(500)), Some(&num(150)), Reply::new(6, outbox))
            .await;
        assert_eq!(drain(&mut rx)[0]["error"], "NOT_LOGGED_IN");
        assert!(fx.engine.bets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guest_cash_out_never_reaches_engine() {
        let (fx, router, outbox, mut rx) = setup();
        router.cash_out(None, Reply::new(7, outbox)).await;
        assert_eq!(drain(&mut rx)[0]["error"], "NOT_LOGGED_IN");
        assert!(fx.engine.cash_outs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cash_out_outcomes() {
        let (fx, router, outbox, mut rx) = setup();
        let player = session("joe", UserClass::Player);

        router.cash_out(Some(&player), Reply::new(8, outbox.clone())).await;
        assert_eq!(drain(&mut rx)[0]["error"], Value::Null);

        *fx.engine.cash_out_outcome.lock().unwrap() = Outcome::Rejected("NO_BET_PLACED");
        router.cash_out(Some(&player), Reply::new(9, outbox.clone())).await;
        assert_eq!(drain(&mut rx)[0]["error"], "NO_BET_PLACED");

        *fx.engine.cash_out_outcome.lock().unwrap() = Outcome::Internal;
        router.cash_out(Some(&player), Reply::new(10, outbox)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(fx.engine.cash_outs.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_say_forwards_chat() {
        let (fx, router, outbox, mut rx) = setup();
        let player = session("joe", UserClass::Player);

        router.say(Some(&player), Some("gl everyone"), &outbox).await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(
            fx.chat.said.lock().unwrap().as_slice(),
            &[("joe".to_string(), "gl everyone".to_string())]
        );
    }

    #[tokio::test]
    async fn test_say_validation() {
        let (fx, router, outbox, mut rx) = setup();
        let player = session("joe", UserClass::Player);

        router.say(None, Some("hi"), &outbox).await;
        router.say(Some(&player), None, &outbox).await;
        router.say(Some(&player), Some(""), &outbox).await;
        router.say(Some(&player), Some(&"x".repeat(501)), &outbox).await;

        let frames = drain(&mut rx);
        let descriptions: Vec<_> = frames.iter().map(|f| f["description"].clone()).collect();
        assert_eq!(
            descriptions,
            vec![
                "[say] not logged in",
                "[say] no message",
                "[say] invalid message size",
                "[say] invalid message size",
            ]
        );
        assert!(frames.iter().all(|f| f["type"] == "err"));
        assert!(fx.chat.said.lock().unwrap().is_empty());

        router.say(Some(&player), Some(&"é".repeat(500)), &outbox).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(fx.chat.said.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_say_unknown_command_goes_to_sender_only() {
        let (fx, router, outbox, mut rx) = setup();
        let player = session("joe", UserClass::Player);

        router.say(Some(&player), Some("/unknowncmd"), &outbox).await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "message");
        assert_eq!(frames[0]["data"]["type"], "error");
        assert_eq!(frames[0]["data"]["message"], "Unknown command unknowncmd");
        assert!(fx.chat.said.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_say_mute_as_player_is_refused() {
        let (fx, router, outbox, mut rx) = setup();
        let player = session("joe", UserClass::Player);

        router.say(Some(&player), Some("/mute alice 5m"), &outbox).await;

        assert_eq!(drain(&mut rx)[0]["data"]["message"], "Not a moderator.");
        assert!(fx.chat.mutes.lock().unwrap().is_empty());
    }
}
