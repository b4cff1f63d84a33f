//! Domain entities. Pure data structures for the core business.
//!
//! No Telegram/IO types here; adapters map into these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Telegram chat as the relay sees it. The kind is computed once by the
/// adapter so routing never re-derives forum/linked/DM flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub id: i64,
    pub kind: ChatKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatKind {
    DirectMessage { name: String },
    Group { title: String },
    Forum { title: String },
    LinkedChannel { title: String, broadcast: bool },
}

impl ChatInfo {
    pub fn title(&self) -> &str {
        match &self.kind {
            ChatKind::DirectMessage { name } => name,
            ChatKind::Group { title }
            | ChatKind::Forum { title }
            | ChatKind::LinkedChannel { title, .. } => title,
        }
    }

    pub fn is_forum(&self) -> bool {
        matches!(self.kind, ChatKind::Forum { .. })
    }

    pub fn is_dm(&self) -> bool {
        matches!(self.kind, ChatKind::DirectMessage { .. })
    }

    /// Short label used in the startup dialog listing.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            ChatKind::DirectMessage { .. } => "DM",
            ChatKind::Group { .. } => "Group",
            ChatKind::Forum { .. } => "Forum",
            ChatKind::LinkedChannel { .. } => "Linked",
        }
    }
}

/// Sender of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    /// Active usernames, primary first. May be empty.
    pub usernames: Vec<String>,
}

impl Author {
    pub fn display_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    pub fn primary_username(&self) -> Option<&str> {
        self.usernames.first().map(String::as_str)
    }

    /// First configured identity that refers to this author, if any.
    ///
    /// Usernames compare case-insensitively with an optional leading `@`;
    /// numeric entries compare against the user id.
    pub fn find_match<'a>(&self, identities: &'a [String]) -> Option<&'a str> {
        identities.iter().map(String::as_str).find(|candidate| {
            let candidate = candidate.trim().trim_start_matches('@');
            if candidate.parse::<i64>().is_ok_and(|id| id == self.id) {
                return true;
            }
            self.usernames
                .iter()
                .any(|u| u.eq_ignore_ascii_case(candidate))
        })
    }

    pub fn matches_any(&self, identities: &[String]) -> bool {
        self.find_match(identities).is_some()
    }
}

/// Kind of a positional rich-text annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Text with a hidden link (`[label](url)` on the Telegram side).
    TextUrl,
    /// Bare URL in the text.
    Url,
    Other,
}

/// Offsets and lengths are UTF-16 code units into `Message::raw_text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEntity {
    pub offset: usize,
    pub length: usize,
    pub kind: EntityKind,
    pub url: Option<String>,
}

impl TextEntity {
    pub fn is_link(&self) -> bool {
        matches!(self.kind, EntityKind::TextUrl | EntityKind::Url)
    }
}

/// Reply header of a message. In forums every topic message "replies" to the
/// topic root, so a real reply is only one that points elsewhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyHeader {
    pub reply_to_msg_id: Option<i32>,
    pub top_id: Option<i32>,
    pub forum_topic: bool,
}

impl ReplyHeader {
    /// Id of the topic-creation message, when the message lives in a topic.
    pub fn topic_id(&self) -> Option<i32> {
        if !self.forum_topic {
            return None;
        }
        self.top_id.or(self.reply_to_msg_id)
    }

    /// Id of the message actually being replied to (never the topic root).
    pub fn quoted_reply_id(&self) -> Option<i32> {
        let target = self.reply_to_msg_id?;
        match self.topic_id() {
            Some(topic) if topic == target => None,
            _ => Some(target),
        }
    }
}

/// A single message from a chat. Immutable snapshot per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i32,
    pub chat_id: i64,
    pub author: Option<Author>,
    pub raw_text: String,
    pub entities: Vec<TextEntity>,
    pub has_sticker: bool,
    pub is_edit: bool,
    pub edit_date: Option<DateTime<Utc>>,
    /// Display name of the original author when the message was forwarded.
    pub forwarded_from: Option<String>,
    pub reply: Option<ReplyHeader>,
    /// Set on topic-creation service messages.
    pub topic_title: Option<String>,
    pub media: Option<MediaReference>,
}

impl Message {
    pub fn quoted_reply_id(&self) -> Option<i32> {
        self.reply.as_ref().and_then(ReplyHeader::quoted_reply_id)
    }

    pub fn topic_id(&self) -> Option<i32> {
        self.reply.as_ref().and_then(ReplyHeader::topic_id)
    }

    pub fn is_command(&self) -> bool {
        self.raw_text.starts_with('/')
    }
}

/// Reference to downloadable media attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub message_id: i32,
    pub chat_id: i64,
    pub media_type: MediaType,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
    Animation,
    Other,
}

impl MediaType {
    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Photo => "jpg",
            MediaType::Video => "mp4",
            MediaType::Document => "bin",
            MediaType::Audio => "ogg",
            MediaType::Voice => "ogg",
            MediaType::Sticker => "webp",
            MediaType::Animation => "mp4",
            MediaType::Other => "bin",
        }
    }

    pub fn default_mime(self) -> &'static str {
        match self {
            MediaType::Photo => "image/jpeg",
            MediaType::Video | MediaType::Animation => "video/mp4",
            MediaType::Audio | MediaType::Voice => "audio/ogg",
            MediaType::Sticker => "image/webp",
            MediaType::Document | MediaType::Other => "application/octet-stream",
        }
    }
}

/// Downloaded file ready to be attached to a webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Inbound events produced by the Telegram adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message {
        chat_id: i64,
        message_id: i32,
        is_edit: bool,
        edit_date: Option<DateTime<Utc>>,
    },
    Pinned {
        chat_id: i64,
        message_ids: Vec<i32>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            id: 42,
            first_name: "Alice".into(),
            last_name: Some("Liddell".into()),
            usernames: vec!["alice".into(), "wonderland".into()],
        }
    }

    #[test]
    fn author_matches_alias_id_and_at_prefix() {
        let a = author();
        assert!(a.matches_any(&["@Wonderland".into()]));
        assert!(a.matches_any(&["42".into()]));
        assert!(!a.matches_any(&["bob".into(), "43".into()]));
        assert_eq!(a.find_match(&["x".into(), "ALICE".into()]), Some("ALICE"));
    }

    #[test]
    fn display_name_joins_last_name() {
        assert_eq!(author().display_name(), "Alice Liddell");
    }

    #[test]
    fn forum_reply_to_topic_root_is_not_a_quote() {
        let header = ReplyHeader {
            reply_to_msg_id: Some(10),
            top_id: None,
            forum_topic: true,
        };
        assert_eq!(header.topic_id(), Some(10));
        assert_eq!(header.quoted_reply_id(), None);

        let nested = ReplyHeader {
            reply_to_msg_id: Some(15),
            top_id: Some(10),
            forum_topic: true,
        };
        assert_eq!(nested.topic_id(), Some(10));
        assert_eq!(nested.quoted_reply_id(), Some(15));
    }

    #[test]
    fn plain_reply_has_no_topic() {
        let header = ReplyHeader {
            reply_to_msg_id: Some(7),
            top_id: None,
            forum_topic: false,
        };
        assert_eq!(header.topic_id(), None);
        assert_eq!(header.quoted_reply_id(), Some(7));
    }
}
