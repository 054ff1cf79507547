/// The moderation core's view of the chat network.
///
/// In production : implemented by the chat client binding.
/// In tests and the simulator : [`MemoryDirectory`] (records every call,
/// scripted failures).
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;
use crate::types::{GroupId, UserId};

/// Role names that grant admin rights, compared case-insensitively.
pub const ADMIN_ROLES: [&str; 4] = ["admin", "creator", "superadmin", "owner"];

/// One entry of a group membership snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_super_admin: bool,
    #[serde(default)]
    pub is_creator: bool,
}

impl Participant {
    /// A plain member with no role.
    pub fn member(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            role: None,
            is_admin: false,
            is_super_admin: false,
            is_creator: false,
        }
    }

    /// A member carrying a role string.
    pub fn with_role(id: impl Into<UserId>, role: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            ..Self::member(id)
        }
    }

    /// Admin by role vocabulary or by any of the explicit flags.
    pub fn is_admin(&self) -> bool {
        if self.is_admin || self.is_super_admin || self.is_creator {
            return true;
        }
        self.role
            .as_deref()
            .map(|role| ADMIN_ROLES.iter().any(|r| role.eq_ignore_ascii_case(r)))
            .unwrap_or(false)
    }
}

/// A message the core asks the directory to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    /// Users tagged in the message.
    pub mentions: Vec<UserId>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mentions: Vec::new(),
        }
    }

    pub fn mentioning(text: impl Into<String>, user: UserId) -> Self {
        Self {
            text: text.into(),
            mentions: vec![user],
        }
    }
}

/// Operations the core needs from the chat network.
#[async_trait::async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Current membership of a group.
    async fn fetch_membership(&self, group: &GroupId) -> Result<Vec<Participant>, DirectoryError>;

    /// Expel a user from a group.
    async fn remove_participant(&self, group: &GroupId, user: &UserId) -> Result<(), DirectoryError>;

    /// Delete a message for everyone.
    async fn delete_message(
        &self,
        group: &GroupId,
        message_id: &str,
        sender: &UserId,
    ) -> Result<(), DirectoryError>;

    /// Deliver a message to a chat.
    async fn send_message(&self, target: &GroupId, message: OutboundMessage) -> Result<(), DirectoryError>;
}

// ── MemoryDirectory ─────────────────────────────────────────────────────

/// A call recorded by [`MemoryDirectory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum DirectoryCall {
    Fetch { group: GroupId },
    Remove { group: GroupId, user: UserId },
    Delete { group: GroupId, message_id: String },
    Send { target: GroupId, text: String },
}

#[derive(Default)]
struct MemoryState {
    memberships: HashMap<GroupId, Vec<Participant>>,
    calls: Vec<DirectoryCall>,
    /// Remaining fetches that fail (`u32::MAX` fails forever).
    failing_fetches: u32,
    /// Remaining delete failures per message id.
    failing_deletes: HashMap<String, u32>,
    fail_removals: bool,
    fetch_latency: Option<Duration>,
}

/// In-memory directory: answers from a scripted membership table and
/// records every call for later inspection.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the membership of a group.
    pub fn set_membership(&self, group: &GroupId, participants: Vec<Participant>) {
        self.state().memberships.insert(group.clone(), participants);
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next_fetches(&self, n: u32) {
        self.state().failing_fetches = n;
    }

    /// Make every fetch fail from now on.
    pub fn fail_all_fetches(&self) {
        self.state().failing_fetches = u32::MAX;
    }

    /// Make the next `n` deletions of `message_id` fail.
    pub fn fail_deletes_of(&self, message_id: &str, n: u32) {
        self.state().failing_deletes.insert(message_id.to_string(), n);
    }

    pub fn set_fail_removals(&self, fail: bool) {
        self.state().fail_removals = fail;
    }

    /// Delay every fetch by `latency`.
    pub fn set_fetch_latency(&self, latency: Duration) {
        self.state().fetch_latency = Some(latency);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.state().calls.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.count(|c| matches!(c, DirectoryCall::Fetch { .. }))
    }

    /// Message ids of delete attempts, in order.
    pub fn delete_attempts(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                DirectoryCall::Delete { message_id, .. } => Some(message_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn removals(&self) -> Vec<(GroupId, UserId)> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                DirectoryCall::Remove { group, user } => Some((group.clone(), user.clone())),
                _ => None,
            })
            .collect()
    }

    /// Texts of every message sent to `target`.
    pub fn sent_to(&self, target: &GroupId) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                DirectoryCall::Send { target: t, text } if t == target => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&DirectoryCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(*c)).count()
    }
}

#[async_trait::async_trait]
impl GroupDirectory for MemoryDirectory {
    async fn fetch_membership(&self, group: &GroupId) -> Result<Vec<Participant>, DirectoryError> {
        let latency = {
            let mut state = self.state();
            state.calls.push(DirectoryCall::Fetch {
                group: group.clone(),
            });
            state.fetch_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if state.failing_fetches > 0 {
            if state.failing_fetches != u32::MAX {
                state.failing_fetches -= 1;
            }
            return Err(DirectoryError::Request("memory: fetch failed".into()));
        }
        Ok(state.memberships.get(group).cloned().unwrap_or_default())
    }

    async fn remove_participant(&self, group: &GroupId, user: &UserId) -> Result<(), DirectoryError> {
        let mut state = self.state();
        state.calls.push(DirectoryCall::Remove {
            group: group.clone(),
            user: user.clone(),
        });
        if state.fail_removals {
            return Err(DirectoryError::Forbidden("memory: removal refused".into()));
        }
        if let Some(members) = state.memberships.get_mut(group) {
            members.retain(|p| p.id != *user);
        }
        Ok(())
    }

    async fn delete_message(
        &self,
        group: &GroupId,
        message_id: &str,
        _sender: &UserId,
    ) -> Result<(), DirectoryError> {
        let mut state = self.state();
        state.calls.push(DirectoryCall::Delete {
            group: group.clone(),
            message_id: message_id.to_string(),
        });
        if let Some(remaining) = state.failing_deletes.get_mut(message_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DirectoryError::Request("memory: delete failed".into()));
            }
        }
        Ok(())
    }

    async fn send_message(&self, target: &GroupId, message: OutboundMessage) -> Result<(), DirectoryError> {
        self.state().calls.push(DirectoryCall::Send {
            target: target.clone(),
            text: message.text,
        });
        Ok(())
    }
}
