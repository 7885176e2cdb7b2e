//! Slash commands embedded in chat text.
//!
//! Grammar:
//!
//! ```text
//! command  = "/" name ws* rest
//! name     = [A-Za-z]*
//! mute     = ws* user [ws+ duration] ws*
//! unmute   = ws* user ws*
//! user     = [A-Za-z0-9_-]+
//! duration = [1-9][0-9]* ("d" | "h" | "m" | "s")
//! ```
//!
//! Text is parsed into a [`ChatCommand`], checked against the sender's roles,
//! and only then dispatched.

use crate::services::{ServiceError, Services};
use crate::session::Session;
use std::fmt;
use std::time::Duration;
use tracing::{error, info};

/// Unit of a mute duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl DurationUnit {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'd' => Some(DurationUnit::Days),
            'h' => Some(DurationUnit::Hours),
            'm' => Some(DurationUnit::Minutes),
            's' => Some(DurationUnit::Seconds),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            DurationUnit::Days => 'd',
            DurationUnit::Hours => 'h',
            DurationUnit::Minutes => 'm',
            DurationUnit::Seconds => 's',
        }
    }

    fn seconds(self) -> u64 {
        match self {
            DurationUnit::Days => 86_400,
            DurationUnit::Hours => 3_600,
            DurationUnit::Minutes => 60,
            DurationUnit::Seconds => 1,
        }
    }
}

/// How long a mute lasts, e.g. `30m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteDuration {
    pub amount: u64,
    pub unit: DurationUnit,
}

impl MuteDuration {
    /// Mute length when the moderator gives none.
    pub const DEFAULT: MuteDuration = MuteDuration {
        amount: 30,
        unit: DurationUnit::Minutes,
    };

    /// Parse `<positive integer><d|h|m|s>` with no leading zero.
    pub fn parse(text: &str) -> Option<Self> {
        let unit = DurationUnit::from_char(text.chars().last()?)?;
        let digits = &text[..text.len() - 1];
        if digits.is_empty()
            || digits.starts_with('0')
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        Some(Self {
            amount: digits.parse().ok()?,
            unit,
        })
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.amount.saturating_mul(self.unit.seconds()))
    }
}

impl fmt::Display for MuteDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.as_char())
    }
}

/// Arguments of a well-formed `/mute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteTarget<'a> {
    pub username: &'a str,
    pub duration: MuteDuration,
}

/// A parsed slash command. Argument errors are kept as `None` so that role
/// checks run before usage errors are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand<'a> {
    Shutdown,
    Mute {
        shadow: bool,
        target: Option<MuteTarget<'a>>,
    },
    Unmute {
        username: Option<&'a str>,
    },
    Unknown(&'a str),
}

/// Role a command requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Moderator,
}

impl<'a> ChatCommand<'a> {
    /// Parse chat text. Returns `None` when the text is not a command.
    pub fn parse(text: &'a str) -> Option<Self> {
        let body = text.strip_prefix('/')?;
        if body.contains(|c: char| c == '\n' || c == '\r') {
            return None;
        }
        let name_len = body
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(body.len());
        let (name, rest) = body.split_at(name_len);
        let rest = rest.trim_start();

        Some(match name {
            "shutdown" => ChatCommand::Shutdown,
            "mute" | "shadowmute" => ChatCommand::Mute {
                shadow: name == "shadowmute",
                target: parse_mute_args(rest),
            },
            "unmute" => ChatCommand::Unmute {
                username: parse_unmute_args(rest),
            },
            other => ChatCommand::Unknown(other),
        })
    }

    /// Role needed to run this command, if any.
    pub fn required_role(&self) -> Option<Role> {
        match self {
            ChatCommand::Shutdown => Some(Role::Admin),
            ChatCommand::Mute { .. } | ChatCommand::Unmute { .. } => Some(Role::Moderator),
            ChatCommand::Unknown(_) => None,
        }
    }

    /// Check the sender's roles. The error is the chat line to show them.
    pub fn authorize(&self, session: &Session) -> Result<(), &'static str> {
        match self.required_role() {
            Some(Role::Admin) if !session.admin => Err("Not an admin."),
            Some(Role::Moderator) if !session.moderator => Err("Not a moderator."),
            _ => Ok(()),
        }
    }
}

fn is_username(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn parse_mute_args(rest: &str) -> Option<MuteTarget<'_>> {
    let mut words = rest.split_whitespace();
    let username = words.next().filter(|u| is_username(u))?;
    let duration = match words.next() {
        Some(spec) => MuteDuration::parse(spec)?,
        None => MuteDuration::DEFAULT,
    };
    if words.next().is_some() {
        return None;
    }
    Some(MuteTarget { username, duration })
}

fn parse_unmute_args(rest: &str) -> Option<&str> {
    let mut words = rest.split_whitespace();
    let username = words.next().filter(|u| is_username(u))?;
    words.next().is_none().then_some(username)
}

/// Authorize and run a command for `session`.
///
/// Returns the chat error line for the sender, if any. Nothing from here is
/// ever broadcast.
pub async fn execute(
    command: ChatCommand<'_>,
    session: &Session,
    services: &Services,
) -> Option<String> {
    if let Err(denied) = command.authorize(session) {
        return Some(denied.to_string());
    }

    let result = match command {
        ChatCommand::Shutdown => {
            info!("Shutdown requested by {}", session.username);
            services.engine.shutdown().await
        }
        ChatCommand::Mute { shadow, target } => {
            let Some(target) = target else {
                return Some("Usage: /mute <user> [time]".to_string());
            };
            info!(
                "{} {} {} for {}",
                session.username,
                if shadow { "shadow-muted" } else { "muted" },
                target.username,
                target.duration
            );
            services
                .chat
                .mute(shadow, session, target.username, target.duration)
                .await
        }
        ChatCommand::Unmute { username } => {
            let Some(username) = username else {
                return Some("Usage: /unmute <user>".to_string());
            };
            services.chat.unmute(session, username).await
        }
        ChatCommand::Unknown(name) => return Some(format!("Unknown command {}", name)),
    };

    match result {
        Ok(()) => None,
        Err(ServiceError::Rejected(message)) => Some(message),
        Err(e) => {
            error!("[INTERNAL_ERROR] Chat command from {} failed: {}", session.username, e);
            None
        }
    }
}
