//! Access/refresh token holder.
//!
//! This is the only writer of session tokens. Every change is mirrored to
//! durable storage under `auth_token` / `refresh_token`.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::{LocalStorage, AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

pub struct TokenStore {
    tokens: RwLock<Tokens>,
    storage: Arc<dyn LocalStorage>,
}

impl TokenStore {
    /// Restore whatever tokens the previous session left in storage.
    pub fn load(storage: Arc<dyn LocalStorage>) -> Self {
        let tokens = Tokens {
            access: storage.get_item(AUTH_TOKEN_KEY).filter(|t| !t.is_empty()),
            refresh: storage.get_item(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty()),
        };
        Self {
            tokens: RwLock::new(tokens),
            storage,
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens.read().access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens.read().refresh.clone()
    }

    pub fn has_access_token(&self) -> bool {
        self.tokens.read().access.is_some()
    }

    /// Replace the access token and, when given, the refresh token.
    ///
    /// Storage failures are logged; the in-memory session stays usable.
    pub fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        {
            let mut tokens = self.tokens.write();
            tokens.access = Some(access.to_string());
            if let Some(refresh) = refresh {
                tokens.refresh = Some(refresh.to_string());
            }
        }

        if let Err(e) = self.storage.set_item(AUTH_TOKEN_KEY, access) {
            log::warn!("TokenStore: failed to persist access token: {}", e);
        }
        if let Some(refresh) = refresh {
            if let Err(e) = self.storage.set_item(REFRESH_TOKEN_KEY, refresh) {
                log::warn!("TokenStore: failed to persist refresh token: {}", e);
            }
        }
    }

    pub fn clear(&self) {
        *self.tokens.write() = Tokens::default();
        for key in [AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.storage.remove_item(key) {
                log::warn!("TokenStore: failed to remove {}: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_set_tokens_mirrors_to_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let tokens = TokenStore::load(storage.clone());
        assert!(!tokens.has_access_token());

        tokens.set_tokens("a1", Some("r1"));
        assert_eq!(storage.get_item(AUTH_TOKEN_KEY).as_deref(), Some("a1"));
        assert_eq!(storage.get_item(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));

        // Access-only rotation keeps the refresh token
        tokens.set_tokens("a2", None);
        assert_eq!(tokens.access_token().as_deref(), Some("a2"));
        assert_eq!(tokens.refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_load_restores_and_clear_wipes() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item(AUTH_TOKEN_KEY, "persisted").unwrap();
        storage.set_item(REFRESH_TOKEN_KEY, "persisted-refresh").unwrap();

        let tokens = TokenStore::load(storage.clone());
        assert_eq!(tokens.access_token().as_deref(), Some("persisted"));

        tokens.clear();
        assert_eq!(tokens.access_token(), None);
        assert_eq!(tokens.refresh_token(), None);
        assert_eq!(storage.get_item(AUTH_TOKEN_KEY), None);
        assert_eq!(storage.get_item(REFRESH_TOKEN_KEY), None);
    }
}
