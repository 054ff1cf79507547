/// Per-group moderation settings: enforcement flag and whitelist.
///
/// The core reads and writes settings only through [`SettingsStore`].
/// Two stores ship with the crate: [`MemorySettingsStore`] and the
/// persistent [`SqliteSettingsStore`].
pub mod memory;
pub mod sqlite;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StoreError;
use crate::types::{GroupId, UserId};

pub use memory::MemorySettingsStore;
pub use sqlite::SqliteSettingsStore;

/// One whitelist entry: an exempt user, or a domain substring whose links
/// are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WhitelistEntry {
    User(UserId),
    Domain(String),
}

impl WhitelistEntry {
    /// Entries containing `@` are user identities, anything else is a
    /// domain fragment. Both are normalized. Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.contains('@') {
            Some(Self::User(UserId::new(raw)))
        } else {
            Some(Self::Domain(raw.to_lowercase()))
        }
    }
}

impl fmt::Display for WhitelistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(user) => fmt::Display::fmt(user, f),
            Self::Domain(domain) => f.write_str(domain),
        }
    }
}

impl From<String> for WhitelistEntry {
    fn from(s: String) -> Self {
        Self::parse(&s).unwrap_or(Self::Domain(s))
    }
}

impl From<WhitelistEntry> for String {
    fn from(entry: WhitelistEntry) -> Self {
        entry.to_string()
    }
}

/// Settings of one group. Groups never configured are disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSetting {
    pub enabled: bool,
    #[serde(default, deserialize_with = "deserialize_whitelist")]
    pub whitelist: Vec<WhitelistEntry>,
}

fn deserialize_whitelist<'de, D>(deserializer: D) -> Result<Vec<WhitelistEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(parse_entries(raw))
}

/// Parse stored entry strings, dropping blank ones.
pub(crate) fn parse_entries<I, S>(raw: I) -> Vec<WhitelistEntry>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|s| WhitelistEntry::parse(s.as_ref()))
        .collect()
}

impl GroupSetting {
    pub fn is_user_whitelisted(&self, user: &UserId) -> bool {
        self.whitelist
            .iter()
            .any(|e| matches!(e, WhitelistEntry::User(u) if u == user))
    }

    /// True when some whitelisted fragment occurs in `domain`.
    pub fn is_domain_whitelisted(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        self.whitelist
            .iter()
            .any(|e| matches!(e, WhitelistEntry::Domain(d) if !d.is_empty() && domain.contains(d.as_str())))
    }
}

/// Storage for [`GroupSetting`]s.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    /// Prepare the backing storage. Called once by the service on startup.
    async fn init(&self) -> Result<(), StoreError>;

    /// Settings of `group`, or the default when none were stored.
    async fn get_setting(&self, group: &GroupId) -> Result<GroupSetting, StoreError>;

    async fn set_enabled(&self, group: &GroupId, enabled: bool) -> Result<(), StoreError>;

    /// Replace the whitelist of `group`.
    async fn set_whitelist(&self, group: &GroupId, entries: Vec<WhitelistEntry>) -> Result<(), StoreError>;
}

/// Dedup while keeping first-seen order.
pub(crate) fn dedup_entries(entries: Vec<WhitelistEntry>) -> Vec<WhitelistEntry> {
    let mut out: Vec<WhitelistEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        if !out.contains(&entry) {
            out.push(entry);
        }
    }
    out
}
