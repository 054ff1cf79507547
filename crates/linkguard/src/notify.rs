/// Outbound notification text.
use crate::directory::OutboundMessage;
use crate::types::{GroupId, UserId};

/// Warning sent to the group after a violation that did not expel.
pub fn warning(user: &UserId, count: u32, max: u32) -> OutboundMessage {
    let remaining = max.saturating_sub(count);
    let text = if remaining == 0 {
        format!(
            "@{} links are not allowed here. Warning {count}/{max}.",
            user.local()
        )
    } else {
        format!(
            "@{} links are not allowed here. Warning {count}/{max}, {remaining} left before removal.",
            user.local()
        )
    };
    OutboundMessage::mentioning(text, user.clone())
}

/// Announcement after a user has been removed for repeated violations.
pub fn expulsion(user: &UserId, max: u32) -> OutboundMessage {
    OutboundMessage::mentioning(
        format!("@{} was removed after {max} link warnings.", user.local()),
        user.clone(),
    )
}

/// Copy of a deleted message for the log chat.
pub fn log_forward(group: &GroupId, sender: &UserId, text: &str) -> OutboundMessage {
    OutboundMessage::text(format!(
        "Deleted link in {group}\nFrom: {sender}\n\n{text}"
    ))
}
