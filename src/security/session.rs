//! Session contract used by the security core.
//!
//! The key names below are part of the session contract and are shared with
//! anything else reading the session (templates, other services).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{error::SessionError, utils::generate_token};

/// Pending two-factor token.
pub const TWO_FACTOR_TOKEN_KEY: &str = "_2fa_token";
/// Last identifier submitted to a login form.
pub const LAST_USERNAME_KEY: &str = "_security.last_username";

pub const FLASH_ERROR: &str = "error";
pub const FLASH_INFO: &str = "info";

/// Serialized active token for `zone`.
#[must_use]
pub fn security_key(zone: &str) -> String {
    format!("_security_{zone}")
}

/// Path the user originally asked for before being sent to the entry point.
#[must_use]
pub fn target_path_key(zone: &str) -> String {
    format!("_security.{zone}.target_path")
}

pub trait Session: Send {
    fn get(&self, key: &str) -> Option<&str>;
    fn set(&mut self, key: &str, value: String);
    fn remove(&mut self, key: &str) -> Option<String>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drop all data and flashes and rotate the session id.
    fn invalidate(&mut self);

    /// Keep the data but move it to a fresh session id. Called whenever the
    /// session gains an authenticated token.
    fn migrate(&mut self);

    fn add_flash(&mut self, kind: &str, message: String);
    fn take_flashes(&mut self, kind: &str) -> Vec<String>;
    fn peek_flashes(&self, kind: &str) -> Vec<String>;
}

#[derive(Clone, Debug, Default)]
pub struct SessionData {
    values: HashMap<String, String>,
    flashes: HashMap<String, Vec<String>>,
}

/// In-process session. A fresh session has no id until it is saved.
#[derive(Clone, Debug, Default)]
pub struct MemorySession {
    id: Option<String>,
    retired_id: Option<String>,
    data: SessionData,
}

impl MemorySession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.values.is_empty() && self.data.flashes.values().all(Vec::is_empty)
    }
}

impl Session for MemorySession {
    fn get(&self, key: &str) -> Option<&str> {
        self.data.values.get(key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: String) {
        self.data.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        self.data.values.remove(key)
    }

    fn invalidate(&mut self) {
        if let Some(id) = self.id.take() {
            self.retired_id = Some(id);
        }
        self.data = SessionData::default();
    }

    fn migrate(&mut self) {
        if let Some(id) = self.id.take() {
            self.retired_id = Some(id);
        }
    }

    fn add_flash(&mut self, kind: &str, message: String) {
        self.data
            .flashes
            .entry(kind.to_string())
            .or_default()
            .push(message);
    }

    fn take_flashes(&mut self, kind: &str) -> Vec<String> {
        self.data.flashes.remove(kind).unwrap_or_default()
    }

    fn peek_flashes(&self, kind: &str) -> Vec<String> {
        self.data.flashes.get(kind).cloned().unwrap_or_default()
    }
}

struct StoredSession {
    data: SessionData,
    touched: Instant,
}

/// Shared in-memory session store keyed by random ids.
#[derive(Clone)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<String, StoredSession>>>,
    ttl: Duration,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Load the session for `id`, or an empty one when unknown or expired.
    #[must_use]
    pub fn load(&self, id: Option<&str>) -> MemorySession {
        let Some(id) = id else {
            return MemorySession::new();
        };
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.ttl;
        sessions.retain(|_, stored| stored.touched.elapsed() < ttl);
        match sessions.get(id) {
            Some(stored) => MemorySession {
                id: Some(id.to_string()),
                retired_id: None,
                data: stored.data.clone(),
            },
            None => MemorySession::new(),
        }
    }

    /// Persist the session and return its id, assigning a new one when needed.
    ///
    /// Returns `None` when the session is empty and has never been stored.
    ///
    /// # Errors
    /// Returns an error if a new session id cannot be generated.
    pub fn save(&self, session: &mut MemorySession) -> Result<Option<String>, SessionError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(retired) = session.retired_id.take() {
            sessions.remove(&retired);
        }
        if session.id.is_none() && session.is_empty() {
            return Ok(None);
        }
        let id = match session.id.clone() {
            Some(id) => id,
            None => {
                let id = generate_token()?;
                session.id = Some(id.clone());
                id
            }
        };
        sessions.insert(
            id.clone(),
            StoredSession {
                data: session.data.clone(),
                touched: Instant::now(),
            },
        );
        Ok(Some(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
