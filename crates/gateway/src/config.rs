//! Gateway configuration, read from the environment.

use crate::admission::DEFAULT_MAX_CONNECTIONS_PER_ADDRESS;
use crate::backend::DEFAULT_BACKEND_URL;
use crate::client::CLIENT_CHANNEL_BUFFER_SIZE;
use crate::connection::DEFAULT_JOIN_TIMEOUT;
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub http_port: u16,
    pub metrics_port: u16,
    pub nats_url: String,
    pub game_events_subject: String,
    pub chat_events_subject: String,
    pub backend_url: String,
    pub max_connections_per_ip: usize,
    pub join_timeout: Duration,
    pub client_buffer_size: usize,
    pub ping_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_port: 3842,
            metrics_port: 9094,
            nats_url: "nats://localhost:4222".to_string(),
            game_events_subject: "game.events.>".to_string(),
            chat_events_subject: "chat.events.>".to_string(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_ADDRESS,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            client_buffer_size: CLIENT_CHANNEL_BUFFER_SIZE,
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Read the configuration from environment variables, falling back to
    /// defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            http_port: parse(&lookup, "HTTP_PORT", defaults.http_port)?,
            metrics_port: parse(&lookup, "METRICS_PORT", defaults.metrics_port)?,
            nats_url: lookup("NATS_URL").unwrap_or(defaults.nats_url),
            game_events_subject: lookup("GAME_EVENTS_SUBJECT").unwrap_or(defaults.game_events_subject),
            chat_events_subject: lookup("CHAT_EVENTS_SUBJECT").unwrap_or(defaults.chat_events_subject),
            backend_url: lookup("BACKEND_URL").unwrap_or(defaults.backend_url),
            max_connections_per_ip: parse(
                &lookup,
                "MAX_CONNECTIONS_PER_IP",
                defaults.max_connections_per_ip,
            )?,
            join_timeout: Duration::from_millis(parse(
                &lookup,
                "JOIN_TIMEOUT_MS",
                defaults.join_timeout.as_millis() as u64,
            )?),
            client_buffer_size: parse(&lookup, "CLIENT_BUFFER_SIZE", defaults.client_buffer_size)?,
            ping_interval: Duration::from_secs(parse(
                &lookup,
                "PING_INTERVAL_SECS",
                defaults.ping_interval.as_secs(),
            )?),
        })
    }

    /// NATS subjects the fan-out subscribes to.
    pub fn event_subjects(&self) -> Vec<String> {
        vec![
            self.game_events_subject.clone(),
            self.chat_events_subject.clone(),
        ]
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  HTTP_PORT: {}", self.http_port);
        info!("  METRICS_PORT: {}", self.metrics_port);
        info!("  NATS_URL: {}", self.nats_url);
        info!("  GAME_EVENTS_SUBJECT: {}", self.game_events_subject);
        info!("  CHAT_EVENTS_SUBJECT: {}", self.chat_events_subject);
        info!("  BACKEND_URL: {}", self.backend_url);
        info!("  MAX_CONNECTIONS_PER_IP: {}", self.max_connections_per_ip);
        info!("  JOIN_TIMEOUT_MS: {}", self.join_timeout.as_millis());
        info!("  CLIENT_BUFFER_SIZE: {}", self.client_buffer_size);
        info!("  PING_INTERVAL_SECS: {}", self.ping_interval.as_secs());
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got {:?}", key, value)),
        None => Ok(default),
    }
}
