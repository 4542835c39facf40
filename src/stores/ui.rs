//! UI preferences mirrored to durable storage.

use std::sync::Arc;

use tokio::sync::watch;

use crate::storage::{LocalStorage, AI_COPILOT_COLLAPSED_KEY, SIDEBAR_COLLAPSED_KEY, THEME_KEY};
use crate::types::Theme;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiPreferences {
    pub theme: Theme,
    pub sidebar_collapsed: bool,
    pub ai_copilot_collapsed: bool,
}

impl UiPreferences {
    pub fn load(storage: &dyn LocalStorage) -> Self {
        Self {
            theme: Theme::parse(storage.get_item(THEME_KEY).as_deref()),
            sidebar_collapsed: storage.get_bool(SIDEBAR_COLLAPSED_KEY).unwrap_or(false),
            ai_copilot_collapsed: storage.get_bool(AI_COPILOT_COLLAPSED_KEY).unwrap_or(false),
        }
    }
}

pub struct UiStore {
    storage: Arc<dyn LocalStorage>,
    tx: watch::Sender<UiPreferences>,
}

impl UiStore {
    pub fn load(storage: Arc<dyn LocalStorage>) -> Self {
        let (tx, _) = watch::channel(UiPreferences::load(storage.as_ref()));
        Self { storage, tx }
    }

    pub fn preferences(&self) -> UiPreferences {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<UiPreferences> {
        self.tx.subscribe()
    }

    pub fn toggle_sidebar(&self) -> bool {
        let collapsed = !self.preferences().sidebar_collapsed;
        self.tx.send_modify(|p| p.sidebar_collapsed = collapsed);
        self.persist_bool(SIDEBAR_COLLAPSED_KEY, collapsed);
        collapsed
    }

    pub fn toggle_ai_copilot(&self) -> bool {
        let collapsed = !self.preferences().ai_copilot_collapsed;
        self.tx.send_modify(|p| p.ai_copilot_collapsed = collapsed);
        self.persist_bool(AI_COPILOT_COLLAPSED_KEY, collapsed);
        collapsed
    }

    pub fn set_theme(&self, theme: Theme) {
        self.tx.send_if_modified(|p| {
            let changed = p.theme != theme;
            p.theme = theme;
            changed
        });
        if let Err(e) = self.storage.set_item(THEME_KEY, theme.as_str()) {
            log::warn!("UiStore: failed to persist theme: {}", e);
        }
    }

    // Storage failures keep the in-memory preference.
    fn persist_bool(&self, key: &str, value: bool) {
        if let Err(e) = self.storage.set_bool(key, value) {
            log::warn!("UiStore: failed to persist {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_preferences_round_trip_through_storage() {
        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let ui = UiStore::load(storage.clone());
        assert_eq!(ui.preferences(), UiPreferences::default());

        assert!(ui.toggle_sidebar());
        assert!(ui.toggle_ai_copilot());
        assert!(!ui.toggle_ai_copilot());
        ui.set_theme(Theme::Dark);

        assert_eq!(storage.get_item(SIDEBAR_COLLAPSED_KEY).as_deref(), Some("true"));
        assert_eq!(storage.get_item(AI_COPILOT_COLLAPSED_KEY).as_deref(), Some("false"));
        assert_eq!(storage.get_item(THEME_KEY).as_deref(), Some("dark"));

        let reloaded = UiStore::load(storage);
        assert_eq!(
            reloaded.preferences(),
            UiPreferences {
                theme: Theme::Dark,
                sidebar_collapsed: true,
                ai_copilot_collapsed: false,
            }
        );
    }

    #[test]
    fn test_garbage_values_fall_back_to_defaults() {
        let storage = MemoryStorage::new();
        storage.set_item(THEME_KEY, "neon").unwrap();
        storage.set_item(SIDEBAR_COLLAPSED_KEY, "yes").unwrap();
        let prefs = UiPreferences::load(&storage);
        assert_eq!(prefs.theme, Theme::System);
        assert!(!prefs.sidebar_collapsed);
    }
}
