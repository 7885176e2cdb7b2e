//! HTTP client for the game server's internal API.
//!
//! Implements every domain service trait over JSON requests. A 4xx response
//! whose body is `{"error":"CODE"}` is a client-visible rejection; any other
//! failure is internal.

use crate::chat_command::MuteDuration;
use crate::services::{
    ChatService, GameEngine, IdentityService, ServiceError, ServiceResult, UserRecord,
};
use crate::session::Session;
use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

/// Default base URL of the game server's internal API.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3841";

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        ServiceError::Internal(e.into())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Map a failed response to a service error.
pub fn classify_failure(status: StatusCode, body: &str) -> ServiceError {
    if status.is_client_error() {
        if let Ok(ErrorBody { error }) = serde_json::from_str(body) {
            return ServiceError::Rejected(error);
        }
    }
    ServiceError::Internal(anyhow!("backend returned {}: {}", status, body))
}

/// Client for the engine, chat and identity endpoints.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for BackendClient {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL)
    }
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, bool)]) -> ServiceResult<T> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self.http.get(&url).query(query).send().await?;
        Self::read(response).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ServiceResult<Response> {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self.http.post(&url).json(body).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    async fn read<T: DeserializeOwned>(response: Response) -> ServiceResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl GameEngine for BackendClient {
    async fn info(&self) -> ServiceResult<Map<String, Value>> {
        self.get("/engine/info", &[]).await
    }

    async fn table_history(&self) -> ServiceResult<Vec<Value>> {
        self.get("/engine/table-history", &[]).await
    }

    async fn place_bet(&self, session: &Session, amount: u64, auto_cash_out: u64) -> ServiceResult<()> {
        let body = json!({
            "username": session.username,
            "amount": amount,
            "auto_cash_out": auto_cash_out,
        });
        self.post("/engine/bets", &body).await?;
        Ok(())
    }

    async fn cash_out(&self, session: &Session) -> ServiceResult<()> {
        self.post("/engine/cash-outs", &json!({ "username": session.username }))
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> ServiceResult<()> {
        self.post("/engine/shutdown", &json!({})).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatService for BackendClient {
    async fn history(&self, session: Option<&Session>) -> ServiceResult<Vec<Value>> {
        let moderator = session.map(|s| s.moderator).unwrap_or(false);
        self.get("/chat/history", &[("moderator", moderator)]).await
    }

    async fn say(&self, session: &Session, text: &str) -> ServiceResult<()> {
        let body = json!({ "session": session, "message": text });
        self.post("/chat/messages", &body).await?;
        Ok(())
    }

    async fn mute(
        &self,
        shadow: bool,
        moderator: &Session,
        username: &str,
        duration: MuteDuration,
    ) -> ServiceResult<()> {
        let body = json!({
            "shadow": shadow,
            "moderator": moderator,
            "username": username,
            "duration": duration.to_string(),
            "seconds": duration.as_duration().as_secs(),
        });
        self.post("/chat/mutes", &body).await?;
        Ok(())
    }

    async fn unmute(&self, moderator: &Session, username: &str) -> ServiceResult<()> {
        let body = json!({ "moderator": moderator, "username": username });
        self.post("/chat/unmutes", &body).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityService for BackendClient {
    async fn validate_one_time_token(&self, token: Uuid) -> ServiceResult<UserRecord> {
        let response = self
            .post(&format!("/identity/one-time-tokens/{}", token), &json!({}))
            .await?;
        Self::read(response).await
    }
}
