//! Link moderation for group chats.
//!
//! Detects messages carrying resolvable links in enforcement-enabled
//! groups, deletes them through a per-group bounded-concurrency action
//! queue, warns offenders and expels repeat offenders. Admins are exempt;
//! admin status comes from a permanent cache kept fresh by membership
//! events instead of a TTL.
//!
//! Collaborators (chat network, settings storage, DNS) are traits with
//! in-memory defaults for tests and simulation.

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod links;
pub mod membership;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod resolver;
mod retry;
pub mod service;
pub mod settings;
pub mod types;

pub use auth::{admin_set, AuthorizationOracle};
pub use config::{CachePolicy, ModerationConfig, QueueConfig, RetryPolicy, WarningConfig};
pub use directory::{DirectoryCall, GroupDirectory, MemoryDirectory, OutboundMessage, Participant};
pub use error::{ConfigError, DirectoryError, FetchError, ModerationError, StoreError};
pub use links::{extract_links, ExtractedLink};
pub use membership::{
    AdminLookup, HistoryNotice, MembershipCache, MembershipDelta, ParticipantAction,
    ParticipantsUpdate, RetryingFetcher,
};
pub use metrics::{MetricsSnapshot, ModerationMetrics};
pub use queue::{ActionQueue, EnqueueOutcome, PendingAction, ViolationOutcome, WarningLedger};
pub use resolver::{DnsDomainResolver, DomainResolver, StaticResolver};
pub use service::{ExemptReason, IgnoreReason, MessageEvent, ModerationService, Verdict};
pub use settings::{
    GroupSetting, MemorySettingsStore, SettingsStore, SqliteSettingsStore, WhitelistEntry,
};
pub use types::{normalize, GroupId, UserId};
