//! In-memory service fakes for unit tests.

use crate::chat_command::MuteDuration;
use crate::client::{Outbound, OutboxReceiver};
use crate::services::{
    ChatService, GameEngine, IdentityService, ServiceError, ServiceResult, Services, UserClass,
    UserRecord,
};
use crate::session::Session;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Scripted result of a fake service call.
#[derive(Debug, Clone, Copy, Default)]
pub enum Outcome {
    #[default]
    Ok,
    Rejected(&'static str),
    Internal,
}

impl Outcome {
    fn into_result(self) -> ServiceResult<()> {
        match self {
            Outcome::Ok => Ok(()),
            Outcome::Rejected(code) => Err(ServiceError::Rejected(code.to_string())),
            Outcome::Internal => Err(ServiceError::Internal(anyhow::anyhow!("backend exploded"))),
        }
    }
}

#[derive(Default)]
pub struct FakeEngine {
    pub bets: Mutex<Vec<(String, u64, u64)>>,
    pub cash_outs: Mutex<Vec<String>>,
    pub shutdowns: AtomicUsize,
    pub bet_outcome: Mutex<Outcome>,
    pub cash_out_outcome: Mutex<Outcome>,
    pub info_fails: AtomicBool,
}

#[async_trait]
impl GameEngine for FakeEngine {
    async fn info(&self) -> ServiceResult<Map<String, Value>> {
        if self.info_fails.load(Ordering::SeqCst) {
            return Err(ServiceError::Internal(anyhow::anyhow!("engine unreachable")));
        }
        let mut info = Map::new();
        info.insert("state".into(), json!("WAITING"));
        info.insert("game_id".into(), json!(42));
        Ok(info)
    }

    async fn table_history(&self) -> ServiceResult<Vec<Value>> {
        Ok(vec![json!({"game_id": 41, "game_crash": 187})])
    }

    async fn place_bet(&self, session: &Session, amount: u64, auto_cash_out: u64) -> ServiceResult<()> {
        self.bets
            .lock()
            .unwrap()
            .push((session.username.clone(), amount, auto_cash_out));
        self.bet_outcome.lock().unwrap().into_result()
    }

    async fn cash_out(&self, session: &Session) -> ServiceResult<()> {
        self.cash_outs.lock().unwrap().push(session.username.clone());
        self.cash_out_outcome.lock().unwrap().into_result()
    }

    async fn shutdown(&self) -> ServiceResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuteCall {
    pub shadow: bool,
    pub moderator: String,
    pub username: String,
    pub duration: String,
}

#[derive(Default)]
pub struct FakeChat {
    pub said: Mutex<Vec<(String, String)>>,
    pub mutes: Mutex<Vec<MuteCall>>,
    pub unmutes: Mutex<Vec<(String, String)>>,
    pub mute_outcome: Mutex<Outcome>,
}

#[async_trait]
impl ChatService for FakeChat {
    async fn history(&self, session: Option<&Session>) -> ServiceResult<Vec<Value>> {
        let mut history = vec![json!({"username": "carol", "message": "gl all"})];
        if session.map(|s| s.moderator).unwrap_or(false) {
            history.push(json!({"username": "dave", "message": "muted line"}));
        }
        Ok(history)
    }

    async fn say(&self, session: &Session, text: &str) -> ServiceResult<()> {
        self.said
            .lock()
            .unwrap()
            .push((session.username.clone(), text.to_string()));
        Ok(())
    }

    async fn mute(
        &self,
        shadow: bool,
        moderator: &Session,
        username: &str,
        duration: MuteDuration,
    ) -> ServiceResult<()> {
        self.mutes.lock().unwrap().push(MuteCall {
            shadow,
            moderator: moderator.username.clone(),
            username: username.to_string(),
            duration: duration.to_string(),
        });
        self.mute_outcome.lock().unwrap().into_result()
    }

    async fn unmute(&self, moderator: &Session, username: &str) -> ServiceResult<()> {
        self.unmutes
            .lock()
            .unwrap()
            .push((moderator.username.clone(), username.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeIdentity {
    pub users: Mutex<HashMap<Uuid, UserRecord>>,
    pub fails: AtomicBool,
}

impl FakeIdentity {
    /// Issue a token for a new user and return it.
    pub fn issue(&self, username: &str, userclass: UserClass) -> Uuid {
        let token = Uuid::new_v4();
        self.users.lock().unwrap().insert(
            token,
            UserRecord {
                username: username.to_string(),
                balance_satoshis: 50_000,
                userclass,
            },
        );
        token
    }
}

#[async_trait]
impl IdentityService for FakeIdentity {
    async fn validate_one_time_token(&self, token: Uuid) -> ServiceResult<UserRecord> {
        if self.fails.load(Ordering::SeqCst) {
            return Err(ServiceError::Internal(anyhow::anyhow!("database down")));
        }
        self.users
            .lock()
            .unwrap()
            .remove(&token)
            .ok_or_else(|| ServiceError::Rejected("NOT_VALID_TOKEN".to_string()))
    }
}

pub struct Fixture {
    pub engine: Arc<FakeEngine>,
    pub chat: Arc<FakeChat>,
    pub identity: Arc<FakeIdentity>,
    pub services: Services,
}

pub fn fixture() -> Fixture {
    let engine = Arc::new(FakeEngine::default());
    let chat = Arc::new(FakeChat::default());
    let identity = Arc::new(FakeIdentity::default());
    let services = Services {
        engine: engine.clone(),
        chat: chat.clone(),
        identity: identity.clone(),
    };
    Fixture {
        engine,
        chat,
        identity,
        services,
    }
}

pub fn session(username: &str, userclass: UserClass) -> Session {
    Session::from_user(UserRecord {
        username: username.to_string(),
        balance_satoshis: 50_000,
        userclass,
    })
}

/// Everything queued so far, parsed as JSON. `Close` shows up as `"close"`.
pub fn drain(rx: &mut OutboxReceiver) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Some(item) = rx.try_recv() {
        match item {
            Outbound::Frame(text) => frames.push(serde_json::from_str(&text).unwrap()),
            Outbound::Close => frames.push(json!("close")),
        }
    }
    frames
}
