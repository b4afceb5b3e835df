//! Trigger detection.
//!
//! A trigger is a channel post referencing the delivery agent through a
//! start link. A standalone post must carry media next to the link; a media
//! group qualifies through whichever member holds the link.

use regex::Regex;
use std::sync::LazyLock;

use crate::transport::{ChatId, GroupId, InboundMessage, MessageId};

static TRIGGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https://t\.me/([^?\s]+)\?start=([\w-]+)").unwrap());

/// Delivery agent reference extracted from a trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRef {
    pub agent_name: String,
    pub token: String,
}

impl TriggerRef {
    /// Handle of the delivery agent, e.g. `@files_bot`.
    pub fn agent_handle(&self) -> String {
        format!("@{}", self.agent_name)
    }

    /// Command asking the agent to deliver the referenced media.
    pub fn start_command(&self) -> String {
        format!("/start {}", self.token)
    }
}

/// Extract the first agent reference from `text`.
pub fn extract_trigger(text: &str) -> Option<TriggerRef> {
    let captures = TRIGGER_RE.captures(text)?;
    Some(TriggerRef {
        agent_name: captures.get(1)?.as_str().to_string(),
        token: captures.get(2)?.as_str().to_string(),
    })
}

/// A detected trigger, ready to open a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCandidate {
    pub chat_id: ChatId,
    /// Message whose caption gets replaced once a link is issued
    pub message_id: MessageId,
    pub caption: String,
    pub reference: TriggerRef,
}

impl TriggerCandidate {
    fn from_message(message: &InboundMessage, reference: TriggerRef) -> Self {
        Self {
            chat_id: message.chat_id,
            message_id: message.id,
            caption: message.text.clone(),
            reference,
        }
    }
}

/// Trigger carried by a single ungrouped post with media.
pub fn detect_single(message: &InboundMessage) -> Option<TriggerCandidate> {
    if message.grouped_id.is_some() || !message.has_media() {
        return None;
    }
    let reference = extract_trigger(&message.text)?;
    Some(TriggerCandidate::from_message(message, reference))
}

/// Trigger of media group `group` among `messages` (any order): the earliest
/// member whose text holds an agent reference.
pub fn find_group_trigger(messages: &[InboundMessage], group: GroupId) -> Option<TriggerCandidate> {
    let mut members: Vec<&InboundMessage> = messages
        .iter()
        .filter(|m| m.grouped_id == Some(group))
        .collect();
    members.sort_by_key(|m| m.id);
    members.into_iter().find_map(|m| {
        extract_trigger(&m.text).map(|reference| TriggerCandidate::from_message(m, reference))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MediaAttachment;

    fn message(id: MessageId, text: &str, group: Option<GroupId>, media: bool) -> InboundMessage {
        InboundMessage {
            id,
            chat_id: -1001,
            sender_id: None,
            outgoing: false,
            text: text.to_string(),
            grouped_id: group,
            media: media.then(MediaAttachment::default),
            date: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_extract_trigger() {
        let reference = extract_trigger("grab it https://t.me/files_bot?start=abc-123_x now").unwrap();
        assert_eq!(reference.agent_name, "files_bot");
        assert_eq!(reference.token, "abc-123_x");
        assert_eq!(reference.agent_handle(), "@files_bot");
        assert_eq!(reference.start_command(), "/start abc-123_x");
    }

    #[test]
    fn test_extract_trigger_case_insensitive_scheme() {
        assert!(extract_trigger("HTTPS://T.ME/Bot?start=Z").is_some());
        assert!(extract_trigger("https://t.me/bot").is_none());
        assert!(extract_trigger("https://example.com/bot?start=x").is_none());
    }

    #[test]
    fn test_extract_trigger_skips_bare_links() {
        let reference = extract_trigger("via https://t.me/chan more https://t.me/files_bot?start=t").unwrap();
        assert_eq!(reference.agent_name, "files_bot");
        assert_eq!(reference.token, "t");
    }

    #[test]
    fn test_detect_single_requires_media() {
        let text = "https://t.me/files_bot?start=tok";
        assert!(detect_single(&message(1, text, None, false)).is_none());

        let candidate = detect_single(&message(2, text, None, true)).unwrap();
        assert_eq!(candidate.message_id, 2);
        assert_eq!(candidate.caption, text);
    }

    #[test]
    fn test_detect_single_ignores_group_members() {
        assert!(detect_single(&message(3, "https://t.me/b?start=t", Some(9), true)).is_none());
    }

    #[test]
    fn test_group_trigger_uses_earliest_matching_member() {
        let messages = vec![
            message(12, "https://t.me/late_bot?start=second", Some(7), true),
            message(10, "", Some(7), true),
            message(11, "https://t.me/files_bot?start=first", Some(7), true),
            message(9, "https://t.me/other?start=x", Some(8), true),
        ];
        let candidate = find_group_trigger(&messages, 7).unwrap();
        assert_eq!(candidate.message_id, 11);
        assert_eq!(candidate.reference.token, "first");
    }

    #[test]
    fn test_group_without_reference() {
        let messages = vec![message(10, "just photos", Some(7), true)];
        assert!(find_group_trigger(&messages, 7).is_none());
    }
}
