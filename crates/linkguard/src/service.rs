/// ModerationService — owns every moderation component of one bot instance.
///
/// All mutable state (admin cache, in-flight fetches, action queues,
/// duplicate window, warning counters) lives here. Nothing is global:
/// independent services coexist in one process.
///
/// Intake never fails toward the host. Collaborator failures become safe
/// defaults: enforcement off when settings cannot be read, "not admin"
/// when membership cannot be fetched.
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthorizationOracle;
use crate::config::ModerationConfig;
use crate::directory::GroupDirectory;
use crate::error::ModerationError;
use crate::links::extract_links;
use crate::membership::{HistoryNotice, MembershipCache, MembershipDelta, ParticipantsUpdate, RetryingFetcher};
use crate::metrics::{bump, MetricsSnapshot, ModerationMetrics};
use crate::queue::{ActionProcessor, ActionQueue, EnqueueOutcome, PendingAction, WarningLedger};
use crate::resolver::DomainResolver;
use crate::settings::{GroupSetting, SettingsStore, WhitelistEntry};
use crate::types::{GroupId, UserId};

/// An incoming chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub group: GroupId,
    pub message_id: String,
    pub sender: UserId,
    #[serde(default)]
    pub text: String,
    /// Sent by the bot's own account.
    #[serde(default)]
    pub from_self: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    ShuttingDown,
    NotAGroup,
    EmptyText,
    FromSelf,
    /// Settings could not be read; enforcement is treated as off.
    SettingUnavailable,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemptReason {
    WhitelistedSender,
    Admin,
}

/// How a message was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Ignored(IgnoreReason),
    Exempt(ExemptReason),
    /// No link that is both non-whitelisted and resolvable.
    Clean,
    /// A deletion was queued.
    Enqueued,
    /// Already queued within the duplicate window.
    Duplicate,
}

pub struct ModerationService {
    config: ModerationConfig,
    settings: Arc<dyn SettingsStore>,
    resolver: Arc<dyn DomainResolver>,
    cache: Arc<MembershipCache>,
    fetcher: Arc<RetryingFetcher>,
    oracle: AuthorizationOracle,
    ledger: Arc<WarningLedger>,
    queue: ActionQueue,
    cancel: CancellationToken,
    metrics: Arc<ModerationMetrics>,
}

impl ModerationService {
    /// Validate `config`, prepare the settings store and wire the components.
    pub async fn init(
        config: ModerationConfig,
        directory: Arc<dyn GroupDirectory>,
        settings: Arc<dyn SettingsStore>,
        resolver: Arc<dyn DomainResolver>,
    ) -> Result<Self, ModerationError> {
        config.validate()?;
        settings.init().await?;

        let cancel = CancellationToken::new();
        let metrics = Arc::new(ModerationMetrics::new());
        let cache = Arc::new(MembershipCache::new(config.cache));
        let fetcher = Arc::new(RetryingFetcher::new(
            directory.clone(),
            cache.clone(),
            config.fetch,
            cancel.clone(),
            metrics.clone(),
        ));
        let oracle = AuthorizationOracle::new(
            cache.clone(),
            fetcher.clone(),
            config.group_suffix.clone(),
            metrics.clone(),
        );
        let ledger = Arc::new(WarningLedger::new(
            config.warnings,
            directory.clone(),
            metrics.clone(),
        ));
        let processor = ActionProcessor::new(
            directory,
            ledger.clone(),
            config.log_target.clone(),
            config.queue.delete_retry,
            cancel.clone(),
            metrics.clone(),
        );
        let queue = ActionQueue::new(config.queue.clone(), processor, cancel.clone(), metrics.clone());

        tracing::info!(
            group_suffix = %config.group_suffix,
            max_active_groups = config.queue.max_active_groups,
            max_warns = config.warnings.max_warns,
            "moderation service started"
        );

        Ok(Self {
            config,
            settings,
            resolver,
            cache,
            fetcher,
            oracle,
            ledger,
            queue,
            cancel,
            metrics,
        })
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn is_self(&self, user: &UserId) -> bool {
        self.config.self_id.as_ref() == Some(user)
    }

    // ── Message intake ───────────────────────────────────────────────────

    /// Classify a message and queue its deletion if it violates the policy.
    pub async fn handle_message(&self, event: MessageEvent) -> Verdict {
        bump(&self.metrics.messages_seen);
        let verdict = self.classify(event).await;
        tracing::debug!(?verdict, "message classified");
        verdict
    }

    async fn classify(&self, event: MessageEvent) -> Verdict {
        if self.is_shut_down() {
            return Verdict::Ignored(IgnoreReason::ShuttingDown);
        }
        if !event.group.is_group_scoped(&self.config.group_suffix) {
            return Verdict::Ignored(IgnoreReason::NotAGroup);
        }
        if event.text.trim().is_empty() {
            return Verdict::Ignored(IgnoreReason::EmptyText);
        }
        if event.from_self || self.is_self(&event.sender) {
            return Verdict::Ignored(IgnoreReason::FromSelf);
        }

        let setting = match self.settings.get_setting(&event.group).await {
            Ok(setting) => setting,
            Err(e) => {
                tracing::warn!(group = %event.group, error = %e, "cannot read group settings, not enforcing");
                return Verdict::Ignored(IgnoreReason::SettingUnavailable);
            }
        };
        if !setting.enabled {
            return Verdict::Ignored(IgnoreReason::Disabled);
        }
        if setting.is_user_whitelisted(&event.sender) {
            return Verdict::Exempt(ExemptReason::WhitelistedSender);
        }

        let links = extract_links(&event.text);
        if links.is_empty() {
            return Verdict::Clean;
        }
        if self.oracle.is_admin(&event.group, &event.sender, false).await {
            return Verdict::Exempt(ExemptReason::Admin);
        }

        let mut checked = HashSet::new();
        let mut violating = false;
        for link in &links {
            if setting.is_domain_whitelisted(&link.domain) || !checked.insert(link.domain.as_str()) {
                continue;
            }
            if self.resolver.resolves(&link.domain).await {
                tracing::debug!(group = %event.group, domain = %link.domain, "resolvable link found");
                violating = true;
                break;
            }
        }
        if !violating {
            return Verdict::Clean;
        }

        let action = PendingAction {
            group: event.group,
            message_id: event.message_id,
            sender: event.sender,
            text: event.text,
        };
        match self.queue.enqueue(action) {
            EnqueueOutcome::Queued => Verdict::Enqueued,
            EnqueueOutcome::Duplicate => Verdict::Duplicate,
            EnqueueOutcome::ShuttingDown => Verdict::Ignored(IgnoreReason::ShuttingDown),
        }
    }

    // ── Membership intake ────────────────────────────────────────────────

    /// Apply a live participant update to the admin cache. Never fetches.
    pub fn handle_participants_update(&self, update: &ParticipantsUpdate) {
        self.apply_delta(&update.group, MembershipDelta::from(update));
    }

    /// Apply a history notice to the admin cache. Never fetches.
    pub fn handle_history_notice(&self, notice: &HistoryNotice) {
        self.apply_delta(&notice.group, MembershipDelta::from(notice));
    }

    fn apply_delta(&self, group: &GroupId, delta: MembershipDelta) {
        if self.is_shut_down() {
            return;
        }
        tracing::debug!(group = %group, ?delta, "membership event");
        self.cache.apply(group, &delta);
    }

    /// Forget the cached admins of one group.
    pub fn invalidate(&self, group: &GroupId) {
        self.cache.invalidate(group);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Admin check as used for moderation. `false` when it cannot be decided.
    pub async fn is_admin(&self, group: &GroupId, user: &UserId) -> bool {
        self.oracle.is_admin(group, user, self.is_self(user)).await
    }

    // ── Admin operations ─────────────────────────────────────────────────

    async fn authorize(&self, group: &GroupId, actor: &UserId) -> Result<(), ModerationError> {
        if self.is_shut_down() {
            return Err(ModerationError::ShutDown);
        }
        if !group.is_group_scoped(&self.config.group_suffix) {
            return Err(ModerationError::NotAGroup { group: group.clone() });
        }
        if self.oracle.is_admin(group, actor, self.is_self(actor)).await {
            Ok(())
        } else {
            Err(ModerationError::NotAuthorized {
                group: group.clone(),
                user: actor.clone(),
            })
        }
    }

    /// Turn link enforcement on or off for a group.
    pub async fn set_enforcement(
        &self,
        group: &GroupId,
        actor: &UserId,
        enabled: bool,
    ) -> Result<(), ModerationError> {
        self.authorize(group, actor).await?;
        self.settings.set_enabled(group, enabled).await?;
        tracing::info!(group = %group, actor = %actor, enabled, "link enforcement changed");
        Ok(())
    }

    /// Replace the whitelist. Raw entries are normalized; blanks are skipped.
    /// Returns the stored entries.
    pub async fn set_whitelist<I, S>(
        &self,
        group: &GroupId,
        actor: &UserId,
        entries: I,
    ) -> Result<Vec<WhitelistEntry>, ModerationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries: Vec<WhitelistEntry> = entries
            .into_iter()
            .filter_map(|raw| WhitelistEntry::parse(raw.as_ref()))
            .collect();
        self.authorize(group, actor).await?;
        self.settings.set_whitelist(group, entries).await?;
        let stored = self.settings.get_setting(group).await?.whitelist;
        tracing::info!(group = %group, actor = %actor, entries = stored.len(), "whitelist replaced");
        Ok(stored)
    }

    /// Add one entry. Returns false if it was already present or blank.
    pub async fn add_whitelist_entry(
        &self,
        group: &GroupId,
        actor: &UserId,
        raw: &str,
    ) -> Result<bool, ModerationError> {
        self.authorize(group, actor).await?;
        let Some(entry) = WhitelistEntry::parse(raw) else {
            return Ok(false);
        };
        let GroupSetting { mut whitelist, .. } = self.settings.get_setting(group).await?;
        if whitelist.contains(&entry) {
            return Ok(false);
        }
        tracing::info!(group = %group, actor = %actor, %entry, "whitelist entry added");
        whitelist.push(entry);
        self.settings.set_whitelist(group, whitelist).await?;
        Ok(true)
    }

    /// Remove one entry. Returns false if it was not present.
    pub async fn remove_whitelist_entry(
        &self,
        group: &GroupId,
        actor: &UserId,
        raw: &str,
    ) -> Result<bool, ModerationError> {
        self.authorize(group, actor).await?;
        let Some(entry) = WhitelistEntry::parse(raw) else {
            return Ok(false);
        };
        let GroupSetting { mut whitelist, .. } = self.settings.get_setting(group).await?;
        let before = whitelist.len();
        whitelist.retain(|e| *e != entry);
        if whitelist.len() == before {
            return Ok(false);
        }
        self.settings.set_whitelist(group, whitelist).await?;
        tracing::info!(group = %group, actor = %actor, %entry, "whitelist entry removed");
        Ok(true)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Resolves once every queued action has been processed.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Stop intake, discard queued work and drop all cached state.
    /// In-flight directory calls are allowed to finish.
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.queue.shutdown().await;
        self.fetcher.clear();
        self.cache.invalidate_all();
        self.ledger.clear();
        tracing::info!("moderation service stopped");
    }
}
