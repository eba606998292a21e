//! Session model: keys, state, event history, and the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Result, TriadError};
use crate::event::Event;

/// Session state: a flat JSON object shared by all agents of a pipeline.
pub type SessionState = serde_json::Map<String, serde_json::Value>;

/// Composite key identifying a session.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// A conversation session with its shared state and event history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub state: SessionState,
    pub events: Vec<Event>,
    pub last_update_time: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey, state: SessionState) -> Self {
        Self {
            key,
            state,
            events: Vec::new(),
            last_update_time: Utc::now(),
        }
    }

    /// Append an event to the history. Partial events are not recorded.
    pub fn append_event(&mut self, event: Event) {
        if event.partial {
            return;
        }
        self.last_update_time = event.timestamp;
        self.events.push(event);
    }

    pub fn set_state(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.state.insert(key.into(), value);
        self.last_update_time = Utc::now();
    }
}

/// Shared, lockable handle to a stored session.
///
/// Holding the lock for the length of an invocation serialises concurrent
/// invocations on the same session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Storage backend for sessions.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn get_session(&self, key: &SessionKey) -> Result<Option<SessionHandle>>;

    /// Create a session. Fails if one already exists under `key`.
    async fn create_session(&self, key: SessionKey, state: SessionState) -> Result<SessionHandle>;

    /// Return the session under `key`, creating it with empty state if absent.
    async fn get_or_create_session(&self, key: SessionKey) -> Result<SessionHandle> {
        if let Some(handle) = self.get_session(&key).await? {
            return Ok(handle);
        }
        self.create_session(key, SessionState::new()).await
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionKey>>;

    async fn delete_session(&self, key: &SessionKey) -> Result<bool>;
}

/// Process-local session store. Sessions live until the process exits.
#[derive(Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn get_session(&self, key: &SessionKey) -> Result<Option<SessionHandle>> {
        Ok(self.sessions.read().await.get(key).cloned())
    }

    async fn create_session(&self, key: SessionKey, state: SessionState) -> Result<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(TriadError::Session(format!(
                "session already exists: {}",
                key.session_id
            )));
        }
        debug!(session_id = %key.session_id, user_id = %key.user_id, "Created session");
        let handle = Arc::new(Mutex::new(Session::new(key.clone(), state)));
        sessions.insert(key, handle.clone());
        Ok(handle)
    }

    async fn get_or_create_session(&self, key: SessionKey) -> Result<SessionHandle> {
        // Single write lock so two concurrent callers cannot both create.
        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(session_id = %key.session_id, user_id = %key.user_id, "Created session");
                Arc::new(Mutex::new(Session::new(key, SessionState::new())))
            })
            .clone();
        Ok(handle)
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<SessionKey>> {
        Ok(self
            .sessions
            .read()
            .await
            .keys()
            .filter(|k| k.app_name == app_name && k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<bool> {
        Ok(self.sessions.write().await.remove(key).is_some())
    }
}
