use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    formatter::{Segment, format_message},
    protocol::SessionId,
};

const TIMEOUT_MESSAGE: &str = "response timed out";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Streaming,
    Complete,
    Errored,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Streaming)
    }
}

/// Session ids are `session_<unix millis>`.
pub fn session_id_for(millis: i64) -> SessionId {
    format!("session_{millis}")
}

/// Id of the display element that renders a session's reply.
pub fn display_id(session_id: &str) -> String {
    format!("ai_{session_id}")
}

/// One user-initiated exchange and the reply streamed back for it.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    prompt: String,
    state: SessionState,
    chunks: Vec<String>,
    segments: Vec<Segment>,
    error: Option<String>,
    typing: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    fn new(id: SessionId, prompt: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            prompt,
            state: SessionState::Pending,
            chunks: Vec::new(),
            segments: Vec::new(),
            error: None,
            typing: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_id(&self) -> String {
        display_id(&self.id)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// The accumulated reply text.
    pub fn content(&self) -> String {
        self.chunks.concat()
    }

    /// What the display surface currently shows: the error text for errored sessions,
    /// otherwise the accumulated reply.
    pub fn displayed_text(&self) -> String {
        match &self.error {
            Some(error) => format!("Error: {error}"),
            None => self.content(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn render(&mut self) {
        self.segments = match &self.error {
            Some(_) => vec![Segment::Text {
                text: self.displayed_text(),
            }],
            None => format_message(&self.content()),
        };
    }
}

/// Owns every in-flight and finished session, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    order: Vec<SessionId>,
    stream_timeout: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(stream_timeout: Option<Duration>) -> Self {
        Self {
            stream_timeout,
            ..Self::default()
        }
    }

    pub fn create_session(&mut self, prompt: impl Into<String>) -> SessionId {
        self.create_session_at(prompt, Utc::now())
    }

    /// Create a `Pending` session stamped at `now`. Two sessions created in the same
    /// millisecond get consecutive ids.
    pub fn create_session_at(&mut self, prompt: impl Into<String>, now: DateTime<Utc>) -> SessionId {
        let mut millis = now.timestamp_millis();
        let mut session_id = session_id_for(millis);
        while self.sessions.contains_key(&session_id) {
            millis += 1;
            session_id = session_id_for(millis);
        }

        let session = Session::new(session_id.clone(), prompt.into(), now);
        self.sessions.insert(session_id.clone(), session);
        self.order.push(session_id.clone());
        debug!(session_id = %session_id, "session created");
        session_id
    }

    /// Apply one streamed chunk. A terminal chunk carries the full reply and replaces the
    /// accumulated content; any other chunk appends.
    pub fn on_chunk(&mut self, session_id: &str, text: &str, is_final: bool) -> Option<&Session> {
        self.on_chunk_at(session_id, text, is_final, Utc::now())
    }

    pub fn on_chunk_at(
        &mut self,
        session_id: &str,
        text: &str,
        is_final: bool,
        now: DateTime<Utc>,
    ) -> Option<&Session> {
        let session = self.sessions.get_mut(session_id)?;

        if is_final {
            session.chunks = vec![text.to_string()];
            session.state = SessionState::Complete;
            session.error = None;
        } else {
            session.chunks.push(text.to_string());
            if session.state == SessionState::Pending {
                session.state = SessionState::Streaming;
            }
        }
        session.typing = false;
        session.updated_at = now;
        session.render();
        Some(&*session)
    }

    pub fn on_error(&mut self, session_id: &str, error: &str) -> Option<&Session> {
        let session = self.sessions.get_mut(session_id)?;
        session.state = SessionState::Errored;
        session.error = Some(error.to_string());
        session.typing = false;
        session.updated_at = Utc::now();
        session.render();
        info!(session_id, error, "session errored");
        Some(&*session)
    }

    /// Mark the exchange finished and drop the typing indicator. An errored session keeps
    /// its error.
    pub fn on_complete(&mut self, session_id: &str) -> Option<&Session> {
        let session = self.sessions.get_mut(session_id)?;
        if session.state != SessionState::Errored {
            session.state = SessionState::Complete;
        }
        session.typing = false;
        session.updated_at = Utc::now();
        Some(&*session)
    }

    /// Close every open session idle for longer than the stream timeout. Returns the ids
    /// that were closed.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> Vec<SessionId> {
        let Some(timeout) = self.stream_timeout else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        for session_id in &self.order {
            let Some(session) = self.sessions.get_mut(session_id) else {
                continue;
            };
            if !session.state.is_open() {
                continue;
            }
            let idle = (now - session.updated_at).to_std().unwrap_or_default();
            if idle > timeout {
                session.state = SessionState::Errored;
                session.error = Some(TIMEOUT_MESSAGE.to_string());
                session.typing = false;
                session.updated_at = now;
                session.render();
                expired.push(session_id.clone());
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "closed stalled sessions");
        }
        expired
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// The most recently created session that is still waiting on its reply.
    pub fn active(&self) -> Option<&Session> {
        self.order
            .iter()
            .rev()
            .filter_map(|session_id| self.sessions.get(session_id))
            .find(|session| session.state.is_open())
    }

    /// Sessions in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.order
            .iter()
            .filter_map(|session_id| self.sessions.get(session_id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn remove(&mut self, session_id: &str) -> Option<Session> {
        self.order.retain(|id| id != session_id);
        self.sessions.remove(session_id)
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.order.clear();
    }
}
