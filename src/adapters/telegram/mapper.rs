//! Map raw Telegram (tl) types to domain entities.
//!
//! Chat kind is decided here, once, from the raw channel flags.

use crate::domain::{
    Author, ChatInfo, ChatKind, EntityKind, InboundEvent, MediaReference, MediaType, Message,
    ReplyHeader, TextEntity,
};
use chrono::{DateTime, Utc};
use grammers_client::tl;
use std::collections::HashMap;

/// Offset between raw channel ids and Bot-API style dialog ids.
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

pub fn channel_dialog_id(channel_id: i64) -> i64 {
    -CHANNEL_ID_OFFSET - channel_id
}

pub fn chat_dialog_id(chat_id: i64) -> i64 {
    -chat_id
}

/// Bot-API style id of a raw peer (users positive, groups negative,
/// channels `-100...`).
pub fn peer_dialog_id(peer: &tl::enums::Peer) -> i64 {
    match peer {
        tl::enums::Peer::User(u) => u.user_id,
        tl::enums::Peer::Chat(c) => chat_dialog_id(c.chat_id),
        tl::enums::Peer::Channel(c) => channel_dialog_id(c.channel_id),
    }
}

/// Forum beats linked; linked means a broadcast channel or a group with a
/// linked channel.
pub fn chat_info_from_tl(chat: &tl::enums::Chat) -> Option<ChatInfo> {
    let (id, kind) = match chat {
        tl::enums::Chat::Empty(_) => return None,
        tl::enums::Chat::Chat(c) => (
            chat_dialog_id(c.id),
            ChatKind::Group {
                title: c.title.clone(),
            },
        ),
        tl::enums::Chat::Forbidden(c) => (
            chat_dialog_id(c.id),
            ChatKind::Group {
                title: c.title.clone(),
            },
        ),
        tl::enums::Chat::Channel(c) => {
            let title = c.title.clone();
            let kind = if c.forum {
                ChatKind::Forum { title }
            } else if c.broadcast || c.has_link {
                ChatKind::LinkedChannel {
                    title,
                    broadcast: c.broadcast,
                }
            } else {
                ChatKind::Group { title }
            };
            (channel_dialog_id(c.id), kind)
        }
        tl::enums::Chat::ChannelForbidden(c) => {
            let title = c.title.clone();
            let kind = if c.broadcast {
                ChatKind::LinkedChannel {
                    title,
                    broadcast: true,
                }
            } else {
                ChatKind::Group { title }
            };
            (channel_dialog_id(c.id), kind)
        }
    };
    Some(ChatInfo { id, kind })
}

pub fn author_from_user(user: &tl::enums::User) -> Option<Author> {
    let tl::enums::User::User(u) = user else {
        return None;
    };
    let mut usernames: Vec<String> = u.username.iter().cloned().collect();
    for tl::enums::Username::Username(extra) in u.usernames.iter().flatten() {
        if extra.active && !usernames.contains(&extra.username) {
            usernames.push(extra.username.clone());
        }
    }
    Some(Author {
        id: u.id,
        first_name: u.first_name.clone().unwrap_or_default(),
        last_name: u.last_name.clone(),
        usernames,
    })
}

/// Channels post as themselves; treat the channel as the author.
fn author_from_chat(chat: &tl::enums::Chat) -> Option<(i64, Author)> {
    match chat {
        tl::enums::Chat::Channel(c) => Some((
            channel_dialog_id(c.id),
            Author {
                id: channel_dialog_id(c.id),
                first_name: c.title.clone(),
                last_name: None,
                usernames: c.username.iter().cloned().collect(),
            },
        )),
        _ => None,
    }
}

/// Authors keyed by dialog id, built from the users/chats that accompany a
/// messages response.
pub fn author_index(users: &[tl::enums::User], chats: &[tl::enums::Chat]) -> HashMap<i64, Author> {
    users
        .iter()
        .filter_map(author_from_user)
        .map(|a| (a.id, a))
        .chain(chats.iter().filter_map(author_from_chat))
        .collect()
}

fn timestamp(secs: i32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs as i64, 0)
}

fn entities_to_domain(entities: Option<&Vec<tl::enums::MessageEntity>>) -> Vec<TextEntity> {
    entities
        .into_iter()
        .flatten()
        .filter_map(|entity| match entity {
            tl::enums::MessageEntity::TextUrl(e) => Some(TextEntity {
                offset: e.offset as usize,
                length: e.length as usize,
                kind: EntityKind::TextUrl,
                url: Some(e.url.clone()),
            }),
            tl::enums::MessageEntity::Url(e) => Some(TextEntity {
                offset: e.offset as usize,
                length: e.length as usize,
                kind: EntityKind::Url,
                url: None,
            }),
            _ => None,
        })
        .collect()
}

fn reply_to_domain(reply: Option<&tl::enums::MessageReplyHeader>) -> Option<ReplyHeader> {
    match reply? {
        tl::enums::MessageReplyHeader::Header(h) => Some(ReplyHeader {
            reply_to_msg_id: h.reply_to_msg_id,
            top_id: h.reply_to_top_id,
            forum_topic: h.forum_topic,
        }),
        _ => None,
    }
}

fn forwarded_from(
    header: Option<&tl::enums::MessageFwdHeader>,
    authors: &HashMap<i64, Author>,
) -> Option<String> {
    let tl::enums::MessageFwdHeader::Header(h) = header?;
    h.from_name.clone().or_else(|| {
        h.from_id
            .as_ref()
            .and_then(|peer| authors.get(&peer_dialog_id(peer)))
            .map(Author::display_name)
    })
}

/// Map a raw message. Service messages only matter when they create a topic.
pub fn message_to_domain(
    msg: &tl::enums::Message,
    chat_id: i64,
    authors: &HashMap<i64, Author>,
) -> Option<Message> {
    match msg {
        tl::enums::Message::Empty(_) => None,
        tl::enums::Message::Message(m) => {
            // Private chats carry no from_id for the other side.
            let sender = m.from_id.as_ref().unwrap_or(&m.peer_id);
            let author = authors.get(&peer_dialog_id(sender)).cloned();
            let media = extract_media_ref(m, chat_id);
            let has_sticker = media
                .as_ref()
                .is_some_and(|r| r.media_type == MediaType::Sticker);
            Some(Message {
                id: m.id,
                chat_id,
                author,
                raw_text: m.message.clone(),
                entities: entities_to_domain(m.entities.as_ref()),
                has_sticker,
                is_edit: m.edit_date.is_some(),
                edit_date: m.edit_date.and_then(timestamp),
                forwarded_from: forwarded_from(m.fwd_from.as_ref(), authors),
                reply: reply_to_domain(m.reply_to.as_ref()),
                topic_title: None,
                media,
            })
        }
        tl::enums::Message::Service(s) => {
            let tl::enums::MessageAction::TopicCreate(action) = &s.action else {
                return None;
            };
            Some(Message {
                id: s.id,
                chat_id,
                author: None,
                raw_text: String::new(),
                entities: Vec::new(),
                has_sticker: false,
                is_edit: false,
                edit_date: None,
                forwarded_from: None,
                reply: reply_to_domain(s.reply_to.as_ref()),
                topic_title: Some(action.title.clone()),
                media: None,
            })
        }
    }
}

fn extract_media_ref(m: &tl::types::Message, chat_id: i64) -> Option<MediaReference> {
    let media = m.media.as_ref()?;
    let (media_type, mime_type, file_name) = match media {
        tl::enums::MessageMedia::Photo(_) => (MediaType::Photo, None, None),
        tl::enums::MessageMedia::Document(d) => match d.document.as_ref() {
            Some(tl::enums::Document::Document(doc)) => {
                let mut media_type = media_type_for_mime(&doc.mime_type);
                let mut file_name = None;
                for attribute in &doc.attributes {
                    match attribute {
                        tl::enums::DocumentAttribute::Sticker(_) => media_type = MediaType::Sticker,
                        tl::enums::DocumentAttribute::Animated => {
                            media_type = MediaType::Animation
                        }
                        tl::enums::DocumentAttribute::Audio(a) if a.voice => {
                            media_type = MediaType::Voice
                        }
                        tl::enums::DocumentAttribute::Filename(f) => {
                            file_name = Some(f.file_name.clone())
                        }
                        _ => {}
                    }
                }
                (media_type, Some(doc.mime_type.clone()), file_name)
            }
            _ => (MediaType::Document, None, None),
        },
        // Link previews, polls, locations: nothing to upload.
        _ => return None,
    };
    Some(MediaReference {
        message_id: m.id,
        chat_id,
        media_type,
        mime_type,
        file_name,
    })
}

fn media_type_for_mime(mime: &str) -> MediaType {
    if mime == "application/x-tgsticker" {
        MediaType::Sticker
    } else if mime.starts_with("video/") {
        MediaType::Video
    } else if mime.starts_with("audio/") {
        MediaType::Audio
    } else {
        MediaType::Document
    }
}

/// New or edited message update -> inbound event.
pub fn message_event(msg: &tl::enums::Message, is_edit: bool) -> Option<InboundEvent> {
    let (id, peer, edit_date) = match msg {
        tl::enums::Message::Message(m) => (m.id, &m.peer_id, m.edit_date),
        tl::enums::Message::Service(s) => (s.id, &s.peer_id, None),
        tl::enums::Message::Empty(_) => return None,
    };
    Some(InboundEvent::Message {
        chat_id: peer_dialog_id(peer),
        message_id: id,
        is_edit,
        edit_date: edit_date.and_then(timestamp),
    })
}

/// Raw pin update -> inbound event. Unpins are ignored.
pub fn pinned_event(update: &tl::enums::Update) -> Option<InboundEvent> {
    match update {
        tl::enums::Update::PinnedChannelMessages(u) if u.pinned => Some(InboundEvent::Pinned {
            chat_id: channel_dialog_id(u.channel_id),
            message_ids: u.messages.clone(),
        }),
        tl::enums::Update::PinnedMessages(u) if u.pinned => Some(InboundEvent::Pinned {
            chat_id: peer_dialog_id(&u.peer),
            message_ids: u.messages.clone(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_ids_follow_bot_api_convention() {
        assert_eq!(channel_dialog_id(1234), -1_000_000_001_234);
        assert_eq!(chat_dialog_id(42), -42);
        let peer = tl::enums::Peer::Channel(tl::types::PeerChannel { channel_id: 7 });
        assert_eq!(peer_dialog_id(&peer), -1_000_000_000_007);
    }

    #[test]
    fn sticker_mime_maps_to_sticker() {
        assert_eq!(media_type_for_mime("application/x-tgsticker"), MediaType::Sticker);
        assert_eq!(media_type_for_mime("video/mp4"), MediaType::Video);
        assert_eq!(media_type_for_mime("application/pdf"), MediaType::Document);
    }
}
