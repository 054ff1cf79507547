/// Configuration for the moderation service.
///
/// Every field has a default matching the production policy. Build in
/// code with the setters, read from a TOML file with
/// [`ModerationConfig::from_toml_str`], or overlay `LINKGUARD_*`
/// environment variables with [`ModerationConfig::from_env`].
///
/// ```rust
/// use linkguard::ModerationConfig;
///
/// let config = ModerationConfig::default()
///     .max_warns(5)
///     .max_active_groups(4);
/// assert!(config.validate().is_ok());
/// ```
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::types::{GroupId, UserId, DEFAULT_GROUP_SUFFIX};

/// Attempt budget with linear backoff: the wait after attempt `n` is
/// `base_delay × n`. No wait follows the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(300))
    }
}

/// Action queue tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Groups allowed to drain at the same time.
    pub max_active_groups: usize,
    /// Actions popped per batch.
    pub batch_size: usize,
    /// Pause between batches of the same group.
    #[serde(with = "humantime_serde")]
    pub batch_delay: Duration,
    /// Wait before retrying to start a drain when the budget is exhausted.
    #[serde(with = "humantime_serde")]
    pub budget_retry_delay: Duration,
    /// Repeated (group, message) pairs inside this window are dropped.
    #[serde(with = "humantime_serde")]
    pub duplicate_window: Duration,
    /// Upper bound on remembered (group, message) pairs.
    pub duplicate_capacity: usize,
    /// Retry policy for message deletion.
    pub delete_retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_active_groups: 2,
            batch_size: 5,
            batch_delay: Duration::from_millis(800),
            budget_retry_delay: Duration::from_millis(150),
            duplicate_window: Duration::from_secs(5),
            duplicate_capacity: 4096,
            delete_retry: RetryPolicy::new(2, Duration::from_millis(400)),
        }
    }
}

/// Warn/expel thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WarningConfig {
    pub max_warns: u32,
    pub remove_on_max: bool,
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            max_warns: 3,
            remove_on_max: true,
        }
    }
}

/// Admin cache policy. Entries never expire unless `max_age` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// The bot's own identity. Actions attributed to it are always allowed.
    pub self_id: Option<UserId>,
    /// Domain that marks group chats. Stored lower-cased.
    #[serde(deserialize_with = "lowercase")]
    pub group_suffix: String,
    /// Chat that receives a copy of every deleted message.
    pub log_target: Option<GroupId>,
    /// Membership fetch retries.
    pub fetch: RetryPolicy,
    pub queue: QueueConfig,
    pub warnings: WarningConfig,
    pub cache: CachePolicy,
}

fn lowercase<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(String::deserialize(deserializer)?.trim().to_lowercase())
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            self_id: None,
            group_suffix: DEFAULT_GROUP_SUFFIX.to_string(),
            log_target: None,
            fetch: RetryPolicy::default(),
            queue: QueueConfig::default(),
            warnings: WarningConfig::default(),
            cache: CachePolicy::default(),
        }
    }
}

impl ModerationConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `LINKGUARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup (environment-style keys).
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(v) = lookup("LINKGUARD_SELF_ID") {
            self.self_id = Some(UserId::new(&v));
        }
        if let Some(v) = lookup("LINKGUARD_GROUP_SUFFIX") {
            self.group_suffix = v.to_lowercase();
        }
        if let Some(v) = lookup("LINKGUARD_LOG_TARGET") {
            self.log_target = Some(GroupId::new(&v));
        }
        if let Some(v) = lookup("LINKGUARD_MAX_WARNS") {
            self.warnings.max_warns = parse_env("LINKGUARD_MAX_WARNS", v)?;
        }
        if let Some(v) = lookup("LINKGUARD_REMOVE_ON_MAX") {
            self.warnings.remove_on_max = parse_env("LINKGUARD_REMOVE_ON_MAX", v)?;
        }
        if let Some(v) = lookup("LINKGUARD_MAX_ACTIVE_GROUPS") {
            self.queue.max_active_groups = parse_env("LINKGUARD_MAX_ACTIVE_GROUPS", v)?;
        }
        if let Some(v) = lookup("LINKGUARD_BATCH_SIZE") {
            self.queue.batch_size = parse_env("LINKGUARD_BATCH_SIZE", v)?;
        }
        if let Some(v) = lookup("LINKGUARD_DUPLICATE_WINDOW_MS") {
            let ms: u64 = parse_env("LINKGUARD_DUPLICATE_WINDOW_MS", v)?;
            self.queue.duplicate_window = Duration::from_millis(ms);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values that would stall the queue or never expel anyone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.max_active_groups == 0 {
            return Err(ConfigError::Invalid("queue.max_active_groups must be > 0".into()));
        }
        if self.queue.batch_size == 0 {
            return Err(ConfigError::Invalid("queue.batch_size must be > 0".into()));
        }
        if self.queue.duplicate_capacity == 0 {
            return Err(ConfigError::Invalid("queue.duplicate_capacity must be > 0".into()));
        }
        if self.fetch.attempts == 0 || self.queue.delete_retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry attempts must be > 0".into()));
        }
        if self.warnings.max_warns == 0 {
            return Err(ConfigError::Invalid("warnings.max_warns must be > 0".into()));
        }
        Ok(())
    }

    // ── Builder setters ──────────────────────────────────────────────────

    pub fn self_id(mut self, id: UserId) -> Self {
        self.self_id = Some(id);
        self
    }

    pub fn log_target(mut self, target: GroupId) -> Self {
        self.log_target = Some(target);
        self
    }

    pub fn max_warns(mut self, max: u32) -> Self {
        self.warnings.max_warns = max;
        self
    }

    pub fn remove_on_max(mut self, enabled: bool) -> Self {
        self.warnings.remove_on_max = enabled;
        self
    }

    pub fn max_active_groups(mut self, n: usize) -> Self {
        self.queue.max_active_groups = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.queue.batch_size = n;
        self
    }

    pub fn duplicate_window(mut self, window: Duration) -> Self {
        self.queue.duplicate_window = window;
        self
    }

    pub fn fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch = policy;
        self
    }

    pub fn delete_retry(mut self, policy: RetryPolicy) -> Self {
        self.queue.delete_retry = policy;
        self
    }

    pub fn cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache.max_age = Some(max_age);
        self
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_policy() {
        let c = ModerationConfig::default();
        assert_eq!(c.fetch.attempts, 3);
        assert_eq!(c.fetch.base_delay, Duration::from_millis(300));
        assert_eq!(c.queue.max_active_groups, 2);
        assert_eq!(c.queue.batch_size, 5);
        assert_eq!(c.queue.batch_delay, Duration::from_millis(800));
        assert_eq!(c.queue.budget_retry_delay, Duration::from_millis(150));
        assert_eq!(c.queue.duplicate_window, Duration::from_secs(5));
        assert_eq!(c.queue.delete_retry, RetryPolicy::new(2, Duration::from_millis(400)));
        assert_eq!(c.warnings.max_warns, 3);
        assert!(c.warnings.remove_on_max);
        assert_eq!(c.cache.max_age, None);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn group_suffix_from_toml_is_lowercased() {
        let c = ModerationConfig::from_toml_str("group_suffix = \"G.US\"\n").unwrap();
        assert_eq!(c.group_suffix, "g.us");
        assert!(GroupId::new("1@g.us").is_group_scoped(&c.group_suffix));
    }

    #[test]
    fn linear_backoff() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_millis(300));
        assert_eq!(p.delay_after(2), Duration::from_millis(600));
    }

    #[test]
    fn toml_partial_override() {
        let c = ModerationConfig::from_toml_str(
            r#"
            self_id = "Bot:2@S.WHATSAPP.NET"
            log_target = "999@g.us"

            [queue]
            batch_size = 10
            batch_delay = "1s"
            duplicate_window = "10s"

            [warnings]
            max_warns = 5
            "#,
        )
        .unwrap();
        assert_eq!(c.self_id, Some(UserId::new("bot@s.whatsapp.net")));
        assert_eq!(c.log_target, Some(GroupId::new("999@g.us")));
        assert_eq!(c.queue.batch_size, 10);
        assert_eq!(c.queue.batch_delay, Duration::from_secs(1));
        assert_eq!(c.queue.duplicate_window, Duration::from_secs(10));
        assert_eq!(c.queue.max_active_groups, 2);
        assert_eq!(c.warnings.max_warns, 5);
        assert!(c.warnings.remove_on_max);
    }

    #[test]
    fn toml_rejects_zero_batch() {
        let err = ModerationConfig::from_toml_str("[queue]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("LINKGUARD_MAX_WARNS", "4"),
            ("LINKGUARD_REMOVE_ON_MAX", "false"),
            ("LINKGUARD_DUPLICATE_WINDOW_MS", "2500"),
            ("LINKGUARD_SELF_ID", "Bot@S.Whatsapp.Net"),
        ]
        .into_iter()
        .collect();
        let c = ModerationConfig::default()
            .overlay(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(c.warnings.max_warns, 4);
        assert!(!c.warnings.remove_on_max);
        assert_eq!(c.queue.duplicate_window, Duration::from_millis(2500));
        assert_eq!(c.self_id, Some(UserId::new("bot@s.whatsapp.net")));
    }

    #[test]
    fn env_overlay_rejects_garbage() {
        let err = ModerationConfig::default()
            .overlay(|k| (k == "LINKGUARD_BATCH_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: "LINKGUARD_BATCH_SIZE",
                ..
            }
        ));
    }
}
