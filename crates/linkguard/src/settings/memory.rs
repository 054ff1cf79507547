use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{dedup_entries, GroupSetting, SettingsStore, WhitelistEntry};
use crate::error::StoreError;
use crate::types::GroupId;

/// Settings held in process memory. Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    settings: Arc<Mutex<HashMap<GroupId, GroupSetting>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with enforcement enabled for the given groups.
    pub fn enabled_for<'a>(groups: impl IntoIterator<Item = &'a GroupId>) -> Self {
        let store = Self::new();
        {
            let mut settings = store.table();
            for group in groups {
                settings.entry(group.clone()).or_default().enabled = true;
            }
        }
        store
    }

    fn table(&self) -> MutexGuard<'_, HashMap<GroupId, GroupSetting>> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_setting(&self, group: &GroupId) -> Result<GroupSetting, StoreError> {
        Ok(self.table().get(group).cloned().unwrap_or_default())
    }

    async fn set_enabled(&self, group: &GroupId, enabled: bool) -> Result<(), StoreError> {
        self.table().entry(group.clone()).or_default().enabled = enabled;
        Ok(())
    }

    async fn set_whitelist(&self, group: &GroupId, entries: Vec<WhitelistEntry>) -> Result<(), StoreError> {
        self.table().entry(group.clone()).or_default().whitelist = dedup_entries(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_group_is_disabled() {
        let store = MemorySettingsStore::new();
        let s = store.get_setting(&GroupId::new("1@g.us")).await.unwrap();
        assert_eq!(s, GroupSetting::default());
        assert!(!s.enabled);
    }

    #[tokio::test]
    async fn enable_and_whitelist_are_independent() {
        let g = GroupId::new("1@g.us");
        let store = MemorySettingsStore::new();
        store
            .set_whitelist(&g, vec![WhitelistEntry::Domain("a.com".into())])
            .await
            .unwrap();
        store.set_enabled(&g, true).await.unwrap();

        let s = store.get_setting(&g).await.unwrap();
        assert!(s.enabled);
        assert_eq!(s.whitelist.len(), 1);
    }

    #[tokio::test]
    async fn seeded_groups_are_enabled() {
        let g = GroupId::new("1@g.us");
        let store = MemorySettingsStore::enabled_for([&g]);
        assert!(store.get_setting(&g).await.unwrap().enabled);
    }
}
