/// Membership events and their reduction to [`MembershipDelta`].
///
/// Two upstream shapes carry the same information: live participant
/// updates tagged with an action, and notices replayed from message
/// history tagged with a numeric stub code. Both adapt into one delta
/// type consumed by [`MembershipCache::apply`](super::MembershipCache::apply).
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, UserId};

/// History notice stub codes understood by the cache.
pub mod stub_codes {
    pub const PARTICIPANT_ADD: u32 = 27;
    pub const PARTICIPANT_REMOVE: u32 = 28;
    pub const PARTICIPANT_PROMOTE: u32 = 29;
    pub const PARTICIPANT_DEMOTE: u32 = 30;
    pub const PARTICIPANT_INVITE: u32 = 31;
    pub const PARTICIPANT_LEAVE: u32 = 32;
}

/// What happened to the membership of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipDelta {
    Promoted(Vec<UserId>),
    Demoted(Vec<UserId>),
    /// Composition changed in a way a role edit cannot express.
    StructuralChange,
    /// Nothing the cache cares about.
    Unknown,
}

/// Action tag of a live participant update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Leave,
    Invite,
    /// Group settings changed.
    Change,
    Promote,
    Demote,
    #[serde(other)]
    Other,
}

impl ParticipantAction {
    /// Parse an action tag, case-insensitively. Unrecognized tags are `Other`.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "leave" => Self::Leave,
            "invite" => Self::Invite,
            "change" => Self::Change,
            "promote" => Self::Promote,
            "demote" => Self::Demote,
            _ => Self::Other,
        }
    }
}

/// Live participant update from the message source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantsUpdate {
    pub group: GroupId,
    pub participants: Vec<UserId>,
    pub action: ParticipantAction,
}

/// System notice replayed from message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryNotice {
    pub group: GroupId,
    pub stub_code: u32,
    #[serde(default)]
    pub stub_params: Vec<String>,
}

impl From<&ParticipantsUpdate> for MembershipDelta {
    fn from(update: &ParticipantsUpdate) -> Self {
        match update.action {
            ParticipantAction::Promote => Self::Promoted(update.participants.clone()),
            ParticipantAction::Demote => Self::Demoted(update.participants.clone()),
            ParticipantAction::Add
            | ParticipantAction::Remove
            | ParticipantAction::Leave
            | ParticipantAction::Invite
            | ParticipantAction::Change => Self::StructuralChange,
            ParticipantAction::Other => Self::Unknown,
        }
    }
}

impl From<&HistoryNotice> for MembershipDelta {
    fn from(notice: &HistoryNotice) -> Self {
        use stub_codes::*;

        let users = || notice.stub_params.iter().map(|p| UserId::new(p)).collect();
        match notice.stub_code {
            PARTICIPANT_PROMOTE => Self::Promoted(users()),
            PARTICIPANT_DEMOTE => Self::Demoted(users()),
            PARTICIPANT_ADD | PARTICIPANT_REMOVE | PARTICIPANT_INVITE | PARTICIPANT_LEAVE => {
                Self::StructuralChange
            }
            _ => Self::Unknown,
        }
    }
}
