//! Durable client-side storage and the credential store.

use crate::auth::Credential;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Storage key for the persisted credential.
pub const CREDENTIAL_KEY: &str = "gateway.credential";
/// Storage key for the cached user profile.
pub const PROFILE_KEY: &str = "gateway.profile";

/// Keyed string storage.
///
/// Mirrors durable web-client storage semantics: failed reads behave as
/// misses, failed writes are logged and dropped.
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: &str);

    /// Remove the entry stored under `key`.
    fn remove(&self, key: &str);
}

/// In-memory storage, used as the default and as a test double.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// File-backed storage: one JSON object per store, rewritten on every
/// change.
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or create) the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "discarding corrupt storage file");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    fn flush(&self, entries: &HashMap<String, String>) {
        let write = serde_json::to_string(entries)
            .map_err(std::io::Error::other)
            .and_then(|raw| std::fs::write(&self.path, raw));
        if let Err(e) = write {
            warn!(path = %self.path.display(), error = %e, "failed to persist storage");
        }
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.write();
        entries.remove(key);
        self.flush(&entries);
    }
}

/// Holds the single process-wide credential and the cached user profile.
///
/// The in-memory snapshot is the runtime source of truth; the injected
/// [`Storage`] makes both survive restarts. The two durable entries are
/// always cleared together.
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
    current: RwLock<Option<Credential>>,
}

impl CredentialStore {
    /// Create a store backed by `storage`, loading any persisted credential.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let current = storage
            .get(CREDENTIAL_KEY)
            .and_then(|raw| match serde_json::from_str(&raw) {
                Ok(credential) => Some(credential),
                Err(e) => {
                    warn!(error = %e, "discarding unreadable persisted credential");
                    None
                }
            });
        Self {
            storage,
            current: RwLock::new(current),
        }
    }

    /// Snapshot of the current credential.
    pub fn credential(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    /// The current access token, if any.
    pub fn access_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.access_token.clone())
    }

    /// The current refresh token, if any.
    pub fn refresh_token(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
    }

    /// Replace the credential wholesale and persist it.
    pub fn set(&self, credential: Credential) {
        match serde_json::to_string(&credential) {
            Ok(raw) => self.storage.set(CREDENTIAL_KEY, &raw),
            Err(e) => warn!(error = %e, "failed to serialize credential"),
        }
        *self.current.write() = Some(credential);
    }

    /// Clear the credential and the cached profile together.
    pub fn clear(&self) {
        *self.current.write() = None;
        self.storage.remove(CREDENTIAL_KEY);
        self.storage.remove(PROFILE_KEY);
    }

    /// Read the cached user profile.
    pub fn profile(&self) -> Option<serde_json::Value> {
        self.storage
            .get(PROFILE_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }

    /// Cache the user profile.
    pub fn set_profile(&self, profile: &serde_json::Value) {
        self.storage.set(PROFILE_KEY, &profile.to_string());
    }
}
