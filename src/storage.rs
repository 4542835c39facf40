//! Durable key/value storage for session tokens and UI preferences.
//!
//! - `FileStorage`: one JSON object on disk, written atomically with owner-only
//!   permissions on unix.
//! - `MemoryStorage`: process-local, used by tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const THEME_KEY: &str = "theme";
pub const SIDEBAR_COLLAPSED_KEY: &str = "sidebarCollapsed";
pub const AI_COPILOT_COLLAPSED_KEY: &str = "aiCopilotCollapsed";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat string key/value store with local-storage semantics.
pub trait LocalStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get_item(key)?.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.set_item(key, if value { "true" } else { "false" })
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.lock().remove(key);
        Ok(())
    }
}

/// File-backed storage. The whole map is cached in memory and rewritten on
/// every change.
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) `storage.json` inside `dir`.
    ///
    /// A corrupt file is logged and treated as empty rather than failing startup.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        let path = dir.join("storage.json");
        let items = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!("FileStorage: ignoring unreadable {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
                }
            }
        }

        let content = serde_json::to_string_pretty(items)?;
        crate::util::atomic_write_str(&self.path, &content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock();
        items.insert(key.to_string(), value.to_string());
        self.persist(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock();
        if items.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("crmdesk");

        let storage = FileStorage::open(&home).unwrap();
        storage.set_item(AUTH_TOKEN_KEY, "access-1").unwrap();
        storage.set_bool(SIDEBAR_COLLAPSED_KEY, true).unwrap();

        let reopened = FileStorage::open(&home).unwrap();
        assert_eq!(reopened.get_item(AUTH_TOKEN_KEY).as_deref(), Some("access-1"));
        assert_eq!(reopened.get_bool(SIDEBAR_COLLAPSED_KEY), Some(true));

        reopened.remove_item(AUTH_TOKEN_KEY).unwrap();
        let again = FileStorage::open(&home).unwrap();
        assert_eq!(again.get_item(AUTH_TOKEN_KEY), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        storage.set_item(REFRESH_TOKEN_KEY, "r").unwrap();

        let mode = std::fs::metadata(storage.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("storage.json"), "not json").unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        assert_eq!(storage.get_item(THEME_KEY), None);
    }

    #[test]
    fn test_bool_values_are_stringified() {
        let storage = MemoryStorage::new();
        storage.set_bool(AI_COPILOT_COLLAPSED_KEY, false).unwrap();
        assert_eq!(storage.get_item(AI_COPILOT_COLLAPSED_KEY).as_deref(), Some("false"));
        storage.set_item(AI_COPILOT_COLLAPSED_KEY, "garbage").unwrap();
        assert_eq!(storage.get_bool(AI_COPILOT_COLLAPSED_KEY), None);
    }
}
