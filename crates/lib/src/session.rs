//! Conversation sessions: ordered, append-only turn history.
//!
//! A [`Session`] owns its turns exclusively; the only mutation is [`Session::append`].
//! The server keeps one session per browser tab in a [`SessionStore`] keyed by id
//! and drops it when the page discards it.

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Human-readable timestamp format used in the UI and in archive files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Who wrote a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// One role-tagged message with its creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(with = "timestamp")]
    pub timestamp: NaiveDateTime,
    pub role: Role,
    pub content: String,
}

impl Turn {
    /// Turn stamped with the current local time, truncated to whole seconds.
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            timestamp: now_seconds(),
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::now(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::now(Role::Assistant, content)
    }

    /// Timestamp rendered as `YYYY-MM-DD HH:MM:SS`.
    pub fn time_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

fn now_seconds() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Serde helpers for `YYYY-MM-DD HH:MM:SS` timestamps.
pub mod timestamp {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(d)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
    }
}

/// A session: id and ordered turn history. Turns are private so history can only grow.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    turns: Vec<Turn>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
        }
    }

    /// Session with a generated `sess-<uuid>` id.
    pub fn generate() -> Self {
        Self::new(format!("sess-{}", uuid::Uuid::new_v4()))
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
}

/// In-memory store for sessions (create, get, append, remove).
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new empty session with a generated id; returns the session id.
    pub async fn create(&self) -> SessionId {
        let session = Session::generate();
        let id = session.id.clone();
        self.inner.write().await.insert(id.clone(), session);
        id
    }

    /// Return a snapshot of the session if it exists.
    pub async fn get(&self, id: &str) -> Option<Session> {
        self.inner.read().await.get(id).cloned()
    }

    /// Append a turn to the end of the session's history.
    pub async fn append(&self, id: &str, turn: Turn) -> Result<(), SessionError> {
        let mut g = self.inner.write().await;
        let session = g
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.append(turn);
        Ok(())
    }

    /// Discard a session (end of its browser session). Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
