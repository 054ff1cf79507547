/// Error types for the moderation core.
///
/// Failures from collaborators are mostly absorbed at the component that
/// made the call and turned into a safe default. These types carry them
/// as far as that boundary, and out of the admin-facing operations.
use crate::types::{GroupId, UserId};

/// A call to the group directory failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Request(String),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("not permitted: {0}")]
    Forbidden(String),
}

/// Fetching the membership of a group failed.
///
/// `Clone` because one outcome is handed to every caller sharing an
/// in-flight fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("membership fetch for {group} failed: {source}")]
    Directory {
        group: GroupId,
        #[source]
        source: DirectoryError,
    },

    #[error("membership of {group} came back empty")]
    EmptyMembership { group: GroupId },

    #[error("membership fetch for {group} gave up after {attempts} attempts: {last}")]
    Exhausted {
        group: GroupId,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("membership fetch cancelled")]
    Cancelled,
}

/// Settings persistence failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("whitelist encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("storage lock poisoned")]
    Poisoned,
}

/// Loading configuration failed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by [`ModerationService`](crate::ModerationService).
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("{user} is not an admin of {group}")]
    NotAuthorized { group: GroupId, user: UserId },

    #[error("{group} is not a group chat")]
    NotAGroup { group: GroupId },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("moderation service is shut down")]
    ShutDown,
}
