use crate::config::SESSION_KEY;
use crate::error::{SyncError, SyncResult};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Key-value storage that outlives the process.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> SyncResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> SyncResult<()>;
    fn remove(&self, key: &str) -> SyncResult<()>;
}

/// JSON object on disk, one entry per key.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> SyncResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text)? {
            Value::Object(map) => Ok(map),
            _ => Err(SyncError::Storage(format!("{} is not a JSON object", self.path.display()))),
        }
    }

    fn write_map(&self, map: &Map<String, Value>) -> SyncResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.read_map()?.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let mut map = self.read_map()?;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemorySessionStore {
    values: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl MemorySessionStore {
    fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, std::collections::HashMap<String, String>>> {
        self.values.lock().map_err(|e| SyncError::Storage(e.to_string()))
    }
}

#[cfg(test)]
impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One authenticated context. `generation` distinguishes successive sessions
/// of the same user so late responses from an earlier one can be rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub generation: u64,
}

/// Owns the active session identity and its persisted form.
pub struct SessionGate {
    store: Box<dyn SessionStore>,
    current: Option<Session>,
    generation: u64,
}

impl SessionGate {
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        Self {
            store,
            current: None,
            generation: 0,
        }
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Reopens the persisted session, if any. Unreadable storage counts as
    /// logged out.
    pub fn restore(&mut self) -> Option<Session> {
        let user_id = match self.store.get(SESSION_KEY) {
            Ok(Some(id)) if !id.trim().is_empty() => id,
            Ok(_) => return None,
            Err(e) => {
                warn!("Could not read persisted session: {}", e);
                return None;
            }
        };
        info!("Restored session for user {}", user_id);
        Some(self.open(user_id))
    }

    pub fn establish(&mut self, user_id: &str) -> SyncResult<Session> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(SyncError::invalid("Login response did not include a user id"));
        }
        self.store.set(SESSION_KEY, user_id)?;
        info!("Established session for user {}", user_id);
        Ok(self.open(user_id.to_string()))
    }

    /// Ends the session and forgets the persisted identifier.
    pub fn teardown(&mut self) -> SyncResult<()> {
        self.current = None;
        self.store.remove(SESSION_KEY)
    }

    /// Ends the in-process session but keeps the persisted identifier.
    pub fn release(&mut self) {
        self.current = None;
    }

    fn open(&mut self, user_id: String) -> Session {
        self.generation += 1;
        let session = Session {
            user_id,
            generation: self.generation,
        };
        self.current = Some(session.clone());
        session
    }
}
