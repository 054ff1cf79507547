/// Chat identities.
///
/// Identities look like `local@domain`, optionally carrying a device or
/// resource suffix (`12345:7@s.whatsapp.net`, `alice@host/phone`). Both
/// group and user identities compare on their normalized form.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default domain marking a group-scoped chat.
pub const DEFAULT_GROUP_SUFFIX: &str = "g.us";

/// Normalize an identity string.
///
/// Lower-cases, splits on the first `@`, and cuts each half at the first
/// `:` or `/`. Input without an `@` is returned lower-cased and otherwise
/// untouched. Total and idempotent.
pub fn normalize(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let Some((local, domain)) = lower.split_once('@') else {
        return lower;
    };
    format!("{}@{}", strip_resource(local), strip_resource(domain))
}

fn strip_resource(part: &str) -> &str {
    match part.find(|c| c == ':' || c == '/') {
        Some(idx) => &part[..idx],
        None => part,
    }
}

// ── UserId ───────────────────────────────────────────────────────────────

/// A user within a group, always held in normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    /// Part before the `@` (the whole identity when there is none).
    pub fn local(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(l, _)| l)
    }

    /// Part after the first `@`, if any.
    pub fn domain(&self) -> Option<&str> {
        self.0.split_once('@').map(|(_, d)| d)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── GroupId ──────────────────────────────────────────────────────────────

/// A chat identity. Only chats whose domain is the configured group suffix
/// are moderated; everything else is a direct conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    /// True when this identity names a group rather than a private chat.
    pub fn is_group_scoped(&self, group_suffix: &str) -> bool {
        match self.0.split_once('@') {
            Some((local, domain)) => !local.is_empty() && domain.eq_ignore_ascii_case(group_suffix),
            None => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<GroupId> for String {
    fn from(id: GroupId) -> Self {
        id.0
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_device_suffix() {
        assert_eq!(normalize("12345:7@s.whatsapp.net"), "12345@s.whatsapp.net");
    }

    #[test]
    fn strips_resource_suffix_on_domain() {
        assert_eq!(normalize("Alice@Host/Phone"), "alice@host");
    }

    #[test]
    fn malformed_input_only_lowercased() {
        assert_eq!(normalize("NoAt:Sign/Here"), "noat:sign/here");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn splits_on_first_at() {
        let id = UserId::new("a@b@c");
        assert_eq!(id.local(), "a");
        assert_eq!(id.domain(), Some("b@c"));
    }

    #[test]
    fn user_ids_compare_normalized() {
        assert_eq!(UserId::new("BOB:3@S.WHATSAPP.NET"), UserId::new("bob@s.whatsapp.net"));
    }

    #[test]
    fn group_scope_detection() {
        assert!(GroupId::new("1203630@g.us").is_group_scoped(DEFAULT_GROUP_SUFFIX));
        assert!(!GroupId::new("555@s.whatsapp.net").is_group_scoped(DEFAULT_GROUP_SUFFIX));
        assert!(!GroupId::new("@g.us").is_group_scoped(DEFAULT_GROUP_SUFFIX));
        assert!(!GroupId::new("g.us").is_group_scoped(DEFAULT_GROUP_SUFFIX));
        assert!(GroupId::new("1203630@g.us").is_group_scoped("G.US"));
    }

    #[test]
    fn serde_normalizes_on_read() {
        let id: UserId = serde_json::from_str("\"Carol:1@X.org\"").unwrap();
        assert_eq!(id.as_str(), "carol@x.org");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"carol@x.org\"");
    }
}
