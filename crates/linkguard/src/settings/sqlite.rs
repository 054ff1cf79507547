/// SQLite-backed settings.
///
/// One row per configured group; the whitelist is a JSON array of entry
/// strings. The connection is blocking, so every query runs on the
/// blocking pool.
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use super::{dedup_entries, parse_entries, GroupSetting, SettingsStore, WhitelistEntry};
use crate::error::StoreError;
use crate::types::GroupId;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS group_settings (
        group_id  TEXT PRIMARY KEY,
        enabled   INTEGER NOT NULL DEFAULT 0,
        whitelist TEXT NOT NULL DEFAULT '[]'
    );
";

#[derive(Clone)]
pub struct SqliteSettingsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSettingsStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::with_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait::async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.run(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    async fn get_setting(&self, group: &GroupId) -> Result<GroupSetting, StoreError> {
        let group = group.clone();
        self.run(move |conn| {
            let row: Option<(bool, String)> = conn
                .query_row(
                    "SELECT enabled, whitelist FROM group_settings WHERE group_id = ?1",
                    params![group.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((enabled, whitelist)) => {
                    let raw: Vec<String> = serde_json::from_str(&whitelist)?;
                    Ok(GroupSetting {
                        enabled,
                        whitelist: parse_entries(raw),
                    })
                }
                None => Ok(GroupSetting::default()),
            }
        })
        .await
    }

    async fn set_enabled(&self, group: &GroupId, enabled: bool) -> Result<(), StoreError> {
        let group = group.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO group_settings (group_id, enabled) VALUES (?1, ?2)
                 ON CONFLICT(group_id) DO UPDATE SET enabled = excluded.enabled",
                params![group.as_str(), enabled],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_whitelist(&self, group: &GroupId, entries: Vec<WhitelistEntry>) -> Result<(), StoreError> {
        let group = group.clone();
        let json = serde_json::to_string(&dedup_entries(entries))?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO group_settings (group_id, whitelist) VALUES (?1, ?2)
                 ON CONFLICT(group_id) DO UPDATE SET whitelist = excluded.whitelist",
                params![group.as_str(), json],
            )?;
            Ok(())
        })
        .await
    }
}
