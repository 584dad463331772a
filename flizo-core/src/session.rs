//! Session context
//!
//! One object owns everything the client persists between requests: the API
//! token, the cached device list, the selected language and a push token that
//! arrived before login. Values live in one of two stores. "Remember me"
//! decides whether the token and device cache go to the durable store or the
//! session-scoped one; the remaining keys are always durable.

use crate::model::Device;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access session file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt session file {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Opaque string key-value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-lifetime storage
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// JSON file storage, rewritten on every mutation
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => HashMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// `<data dir>/flizo-copilot/session.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("flizo-copilot").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(entries).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKey {
    Token,
    Devices,
    Language,
    PendingPushToken,
    RememberMe,
}

impl SessionKey {
    pub const ALL: [SessionKey; 5] = [
        SessionKey::Token,
        SessionKey::Devices,
        SessionKey::Language,
        SessionKey::PendingPushToken,
        SessionKey::RememberMe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKey::Token => "user_api_hash",
            SessionKey::Devices => "devices",
            SessionKey::Language => "language",
            SessionKey::PendingPushToken => "pending_push_token",
            SessionKey::RememberMe => "remember_me",
        }
    }

    /// Keys whose placement follows the "remember me" flag
    fn follows_remember_me(&self) -> bool {
        matches!(self, SessionKey::Token | SessionKey::Devices)
    }
}

/// Keys kept across a logout or a 401
pub const PRESERVED_ON_LOGOUT: [SessionKey; 2] = [SessionKey::Language, SessionKey::PendingPushToken];

#[derive(Clone)]
pub struct Session {
    durable: Arc<dyn KeyValueStore>,
    scoped: Arc<dyn KeyValueStore>,
}

impl Session {
    pub fn new(durable: Arc<dyn KeyValueStore>, scoped: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, scoped }
    }

    /// Both stores in memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn get(&self, key: SessionKey) -> Option<String> {
        self.scoped
            .get(key.as_str())
            .or_else(|| self.durable.get(key.as_str()))
    }

    pub fn set(&self, key: SessionKey, value: impl Into<String>) -> Result<(), StoreError> {
        let (target, other) = if key.follows_remember_me() && !self.remember_me() {
            (&self.scoped, &self.durable)
        } else {
            (&self.durable, &self.scoped)
        };
        // Never leave a stale copy shadowing the new value
        other.remove(key.as_str())?;
        target.set(key.as_str(), value.into())
    }

    pub fn remove(&self, key: SessionKey) -> Result<(), StoreError> {
        self.scoped.remove(key.as_str())?;
        self.durable.remove(key.as_str())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.clear_preserving(&[])
    }

    pub fn clear_preserving(&self, keep: &[SessionKey]) -> Result<(), StoreError> {
        for key in SessionKey::ALL.iter().filter(|k| !keep.contains(k)) {
            self.remove(*key)?;
        }
        Ok(())
    }

    /// Store a fresh token after login
    pub fn begin(&self, token: &str, remember_me: bool) -> Result<(), StoreError> {
        self.durable
            .set(SessionKey::RememberMe.as_str(), if remember_me { "1" } else { "0" }.to_string())?;
        self.set(SessionKey::Token, token)
    }

    /// Logout or session invalidation
    pub fn end(&self) -> Result<(), StoreError> {
        self.clear_preserving(&PRESERVED_ON_LOGOUT)
    }

    pub fn token(&self) -> Option<String> {
        self.get(SessionKey::Token).filter(|t| !t.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn remember_me(&self) -> bool {
        self.durable.get(SessionKey::RememberMe.as_str()).as_deref() == Some("1")
    }

    pub fn language(&self) -> Option<String> {
        self.get(SessionKey::Language)
    }

    pub fn set_language(&self, language: &str) -> Result<(), StoreError> {
        self.set(SessionKey::Language, language)
    }

    /// Last device list seen, or empty when nothing usable is cached
    pub fn cached_devices(&self) -> Vec<Device> {
        self.get(SessionKey::Devices)
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }

    pub fn cache_devices(&self, devices: &[Device]) -> Result<(), StoreError> {
        // Serializing plain structs into a String cannot fail
        let json = serde_json::to_string(devices).unwrap_or_else(|_| "[]".to_string());
        self.set(SessionKey::Devices, json)
    }
}
