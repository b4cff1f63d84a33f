//! Dispatch formatter: turns a rendered message into ordered webhook payloads.

use crate::domain::{
    AllowedMentions, Author, ChannelTarget, ChatInfo, DomainError, Embed, EmbedAuthor, Embedded,
    Listener, Message, OutboundPayload, WebhookPayload,
};
use crate::usecases::renderer::is_single_link;

/// Destination cap on an embed description.
pub const EMBED_DESCRIPTION_MAX: usize = 4096;

pub const PIN_NOTICE: &str = "@everyone Message pinned.";

/// Which side of a reply pair goes into the embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTarget {
    None,
    Message,
    Reply,
}

/// Everything needed to format one message for one listener.
#[derive(Debug, Clone, Copy)]
pub struct FormatInput<'a> {
    pub listener: &'a Listener,
    pub chat: &'a ChatInfo,
    pub channel: Option<&'a ChannelTarget>,
    pub message: &'a Message,
    pub rendered: &'a str,
    /// Resolved reply target with its rendered text.
    pub reply: Option<(&'a Message, &'a str)>,
    pub has_files: bool,
}

pub struct Formatter {
    max_length: usize,
}

impl Formatter {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Ordered payloads for one (message, listener). Empty when there is
    /// nothing to send.
    pub fn format(&self, input: &FormatInput<'_>) -> Result<Vec<OutboundPayload>, DomainError> {
        let listener = input.listener;
        let message = input.message;
        let target = embed_target(listener, message, input.reply.map(|(r, _)| r));

        let mut lines: Vec<String> = Vec::new();
        if listener.mention {
            lines.push("@everyone".to_string());
        }
        if message.is_edit && listener.tracks_edits() {
            lines.push(edited_banner(message));
        }
        if let Some(origin) = message.forwarded_from.as_deref().filter(|o| !o.is_empty()) {
            lines.push(format!("`Forwarded from {}`", origin));
        }

        let mut embed_source: Option<(Option<&Author>, &str)> = None;
        if let Some((reply, reply_text)) = input.reply {
            if target == EmbedTarget::Reply {
                embed_source = Some((reply.author.as_ref(), reply_text));
            } else if listener.shows_replies() {
                if let Some(quote) = quote_block(reply, reply_text) {
                    lines.push(quote);
                }
            }
        }

        if target == EmbedTarget::Message {
            embed_source = Some((message.author.as_ref(), input.rendered));
        } else if !input.rendered.trim().is_empty() {
            lines.push(match message.author.as_ref().filter(|_| !listener.show_user) {
                Some(author) => format!("`{}:` {}", author.first_name, input.rendered),
                None => input.rendered.to_string(),
            });
        }

        let content = lines.join("\n");
        let embeds = match embed_source {
            Some((author, text)) if !text.trim().is_empty() => {
                self.embeds(author, text, listener.embed_color, listener.show_user)?
            }
            _ => Vec::new(),
        };

        if content.is_empty() && embeds.is_empty() && !input.has_files {
            return Ok(Vec::new());
        }

        let base = base_payload(listener, display_name(input), listener.mention);
        let mut out = Vec::new();
        for chunk in split_message(&content, self.max_length)? {
            if chunk.trim().is_empty() {
                continue;
            }
            out.push(OutboundPayload {
                payload: WebhookPayload {
                    content: chunk,
                    ..base.clone()
                },
                attach_files: false,
            });
        }

        // The first embed rides on the last text chunk; overflow gets its own sends.
        let mut embeds = embeds.into_iter();
        if let Some(first) = embeds.next() {
            match out.last_mut() {
                Some(last) => last.payload.embeds.push(first),
                None => out.push(embed_payload(&base, first)),
            }
        }
        out.extend(embeds.map(|embed| embed_payload(&base, embed)));

        if input.has_files {
            out.push(OutboundPayload {
                payload: base,
                attach_files: true,
            });
        }
        Ok(out)
    }

    /// `@everyone Message pinned.` announcement sent before pinned messages.
    pub fn pin_notice(&self, listener: &Listener, chat: &ChatInfo) -> OutboundPayload {
        let name = listener
            .name
            .clone()
            .unwrap_or_else(|| chat.title().to_string());
        OutboundPayload {
            payload: WebhookPayload {
                content: PIN_NOTICE.to_string(),
                ..base_payload(listener, name, true)
            },
            attach_files: false,
        }
    }

    fn embeds(
        &self,
        author: Option<&Author>,
        text: &str,
        color: Option<u32>,
        show_user: bool,
    ) -> Result<Vec<Embed>, DomainError> {
        let author = author
            .filter(|_| !show_user)
            .map(|a| EmbedAuthor {
                name: a.display_name(),
            });
        Ok(split_message(text, EMBED_DESCRIPTION_MAX)?
            .into_iter()
            .enumerate()
            .map(|(i, description)| Embed {
                author: if i == 0 { author.clone() } else { None },
                description,
                color,
            })
            .collect())
    }
}

/// Decide which side, if any, is embedded.
pub fn embed_target(listener: &Listener, message: &Message, reply: Option<&Message>) -> EmbedTarget {
    match &listener.embedded {
        Some(Embedded::Bool(true)) => {
            if listener.dont_embed_singular_links && is_single_link(&message.raw_text) {
                EmbedTarget::None
            } else {
                EmbedTarget::Message
            }
        }
        Some(Embedded::Users(users)) => {
            let hits = |m: Option<&Message>| {
                m.and_then(|m| m.author.as_ref())
                    .is_some_and(|a| a.matches_any(users))
            };
            if hits(Some(message)) {
                EmbedTarget::Message
            } else if hits(reply) {
                EmbedTarget::Reply
            } else {
                EmbedTarget::None
            }
        }
        Some(Embedded::Bool(false)) | None => EmbedTarget::None,
    }
}

/// Outbound identity: listener name, then author with chat, then forum
/// channel, then the chat title.
pub fn display_name(input: &FormatInput<'_>) -> String {
    let listener = input.listener;
    if let Some(name) = &listener.name {
        return name.clone();
    }
    let title = input.chat.title();

    if listener.show_user {
        let subject = if listener.use_reply_user_instead_of_author {
            input.reply.and_then(|(r, _)| r.author.as_ref())
        } else {
            input.message.author.as_ref()
        };
        if let Some(author) = subject {
            let user = listener
                .users
                .as_deref()
                .and_then(|users| author.find_match(users))
                .map(|u| u.trim_start_matches('@').to_string())
                .or_else(|| author.primary_username().map(str::to_string))
                .unwrap_or_else(|| author.display_name());
            return format!("{} ({})", user, title);
        }
    }

    if listener.include_forum_channel_name {
        if let Some(channel) = input.channel.and_then(|c| c.name.as_deref()) {
            return format!("{} -> {}", title, channel);
        }
    }

    title.to_string()
}

/// Split on newlines into the fewest chunks of at most `max` characters.
///
/// Joining the chunks with `"\n"` reproduces `text`. A single line longer
/// than `max` is an error.
pub fn split_message(text: &str, max: usize) -> Result<Vec<String>, DomainError> {
    if text.chars().count() <= max {
        return Ok(vec![text.to_string()]);
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    let mut first = true;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        if line_len > max {
            return Err(DomainError::OversizedChunk {
                length: line_len,
                max,
            });
        }
        if first {
            current.push_str(line);
            current_len = line_len;
            first = false;
        } else if current_len + 1 + line_len > max {
            parts.push(std::mem::take(&mut current));
            current.push_str(line);
            current_len = line_len;
        } else {
            current.push('\n');
            current.push_str(line);
            current_len += 1 + line_len;
        }
    }
    parts.push(current);
    Ok(parts)
}

fn base_payload(listener: &Listener, username: String, mention: bool) -> WebhookPayload {
    WebhookPayload {
        username: Some(username),
        content: String::new(),
        embeds: Vec::new(),
        allowed_mentions: Some(if mention {
            AllowedMentions::everyone()
        } else {
            AllowedMentions::none()
        }),
        extra: listener.extra_webhook_parameters.clone().unwrap_or_default(),
    }
}

fn embed_payload(base: &WebhookPayload, embed: Embed) -> OutboundPayload {
    OutboundPayload {
        payload: WebhookPayload {
            embeds: vec![embed],
            ..base.clone()
        },
        attach_files: false,
    }
}

fn edited_banner(message: &Message) -> String {
    match message.edit_date {
        Some(at) => format!("_Edited <t:{}:f>_", at.timestamp()),
        None => "_Edited_".to_string(),
    }
}

fn quote_block(reply: &Message, text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    let mut lines = text.lines();
    let first = lines.next()?;
    let mut quote = match reply.author.as_ref() {
        Some(author) => format!("> `{}:` {}", author.first_name, first),
        None => format!("> {}", first),
    };
    for line in lines {
        quote.push_str("\n> ");
        quote.push_str(line);
    }
    Some(quote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatKind;
    use chrono::TimeZone;

    fn author(first: &str, username: &str, id: i64) -> Author {
        Author {
            id,
            first_name: first.to_string(),
            last_name: None,
            usernames: vec![username.to_string()],
        }
    }

    fn message(text: &str) -> Message {
        Message {
            id: 10,
            chat_id: -100,
            author: Some(author("Alice", "alice", 1)),
            raw_text: text.to_string(),
            entities: vec![],
            has_sticker: false,
            is_edit: false,
            edit_date: None,
            forwarded_from: None,
            reply: None,
            topic_title: None,
            media: None,
        }
    }

    fn chat() -> ChatInfo {
        ChatInfo {
            id: -100,
            kind: ChatKind::Group {
                title: "Lobby".into(),
            },
        }
    }

    fn input<'a>(
        listener: &'a Listener,
        chat: &'a ChatInfo,
        message: &'a Message,
    ) -> FormatInput<'a> {
        FormatInput {
            listener,
            chat,
            channel: None,
            message,
            rendered: &message.raw_text,
            reply: None,
            has_files: false,
        }
    }

    #[test]
    fn embedded_user_list_embeds_author_message() {
        let listener = Listener {
            embedded: Some(Embedded::Users(vec!["alice".into()])),
            ..Default::default()
        };
        let chat = chat();
        let msg = message("hello");
        let out = Formatter::new(2000).format(&input(&listener, &chat, &msg)).unwrap();

        assert_eq!(out.len(), 1);
        let payload = &out[0].payload;
        assert_eq!(payload.content, "");
        assert_eq!(payload.embeds.len(), 1);
        assert_eq!(payload.embeds[0].description, "hello");
        assert_eq!(payload.username.as_deref(), Some("Lobby"));
    }

    #[test]
    fn plain_message_gets_author_prefix() {
        let listener = Listener::default();
        let chat = chat();
        let msg = message("hi there");
        let out = Formatter::new(2000).format(&input(&listener, &chat, &msg)).unwrap();
        assert_eq!(out[0].payload.content, "`Alice:` hi there");
        assert!(out[0].payload.embeds.is_empty());
        assert_eq!(
            out[0].payload.allowed_mentions,
            Some(AllowedMentions::none())
        );
    }

    #[test]
    fn banners_come_in_fixed_order() {
        let listener = Listener {
            mention: true,
            show_user: true,
            ..Default::default()
        };
        let chat = chat();
        let mut msg = message("body");
        msg.is_edit = true;
        msg.edit_date = Some(chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        msg.forwarded_from = Some("Bob".into());
        let mut reply = message("question");
        reply.author = Some(author("Carol", "carol", 3));

        let mut fi = input(&listener, &chat, &msg);
        fi.reply = Some((&reply, "question"));
        let out = Formatter::new(2000).format(&fi).unwrap();

        assert_eq!(
            out[0].payload.content,
            "@everyone\n_Edited <t:1700000000:f>_\n`Forwarded from Bob`\n> `Carol:` question\nbody"
        );
        assert_eq!(
            out[0].payload.allowed_mentions,
            Some(AllowedMentions::everyone())
        );
        assert_eq!(out[0].payload.username.as_deref(), Some("alice (Lobby)"));
    }

    #[test]
    fn reply_author_match_embeds_the_reply() {
        let listener = Listener {
            embedded: Some(Embedded::Users(vec!["carol".into()])),
            embed_color: Some(0xff0000),
            ..Default::default()
        };
        let chat = chat();
        let msg = message("answer");
        let mut reply = message("question");
        reply.author = Some(author("Carol", "carol", 3));

        let mut fi = input(&listener, &chat, &msg);
        fi.reply = Some((&reply, "question"));
        let out = Formatter::new(2000).format(&fi).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.content, "`Alice:` answer");
        assert_eq!(out[0].payload.embeds[0].description, "question");
        assert_eq!(out[0].payload.embeds[0].color, Some(0xff0000));
        assert_eq!(
            out[0].payload.embeds[0].author.as_ref().map(|a| a.name.as_str()),
            Some("Carol")
        );
    }

    #[test]
    fn hidden_replies_are_not_quoted() {
        let listener = Listener {
            show_replies: Some(false),
            ..Default::default()
        };
        let chat = chat();
        let msg = message("answer");
        let reply = message("question");
        let mut fi = input(&listener, &chat, &msg);
        fi.reply = Some((&reply, "question"));
        let out = Formatter::new(2000).format(&fi).unwrap();
        assert_eq!(out[0].payload.content, "`Alice:` answer");
    }

    #[test]
    fn single_link_is_not_embedded_when_configured() {
        let listener = Listener {
            embedded: Some(Embedded::Bool(true)),
            dont_embed_singular_links: true,
            ..Default::default()
        };
        let chat = chat();
        let msg = message("https://example.com/a");
        assert_eq!(embed_target(&listener, &msg, None), EmbedTarget::None);

        let msg = message("look https://example.com/a");
        assert_eq!(embed_target(&listener, &msg, None), EmbedTarget::Message);

        let out = Formatter::new(2000)
            .format(&input(&listener, &chat, &message("https://example.com/a")))
            .unwrap();
        assert!(out[0].payload.embeds.is_empty());
    }

    #[test]
    fn display_name_priority() {
        let chat = chat();
        let msg = message("x");
        let channel = ChannelTarget {
            name: Some("news".into()),
            main: false,
            webhook: "https://w".into(),
        };

        let named = Listener {
            name: Some("Relay".into()),
            show_user: true,
            ..Default::default()
        };
        assert_eq!(display_name(&input(&named, &chat, &msg)), "Relay");

        let forum = Listener {
            include_forum_channel_name: true,
            ..Default::default()
        };
        let mut fi = input(&forum, &chat, &msg);
        fi.channel = Some(&channel);
        assert_eq!(display_name(&fi), "Lobby -> news");

        let plain = Listener::default();
        assert_eq!(display_name(&input(&plain, &chat, &msg)), "Lobby");

        let mut reply = message("q");
        reply.author = Some(author("Carol", "carol", 3));
        let by_reply = Listener {
            show_user: true,
            use_reply_user_instead_of_author: true,
            ..Default::default()
        };
        let mut fi = input(&by_reply, &chat, &msg);
        fi.reply = Some((&reply, "q"));
        assert_eq!(display_name(&fi), "carol (Lobby)");
    }

    #[test]
    fn files_trail_text_chunks() {
        let listener = Listener {
            show_user: true,
            ..Default::default()
        };
        let chat = chat();
        let msg = message("aaaa\nbbbb\ncccc");
        let mut fi = input(&listener, &chat, &msg);
        fi.has_files = true;
        let out = Formatter::new(9).format(&fi).unwrap();

        let contents: Vec<_> = out.iter().map(|p| p.payload.content.as_str()).collect();
        assert_eq!(contents, vec!["aaaa\nbbbb", "cccc", ""]);
        assert_eq!(
            out.iter().map(|p| p.attach_files).collect::<Vec<_>>(),
            vec![false, false, true]
        );
    }

    #[test]
    fn media_only_message_sends_files_alone() {
        let listener = Listener::default();
        let chat = chat();
        let msg = message("");
        let mut fi = input(&listener, &chat, &msg);
        assert!(Formatter::new(2000).format(&fi).unwrap().is_empty());

        fi.has_files = true;
        let out = Formatter::new(2000).format(&fi).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].attach_files);
        assert_eq!(out[0].payload.content, "");
    }

    #[test]
    fn extra_parameters_are_carried() {
        let mut extra = serde_json::Map::new();
        extra.insert("avatar_url".into(), serde_json::json!("https://a.png"));
        let listener = Listener {
            extra_webhook_parameters: Some(extra.clone()),
            ..Default::default()
        };
        let chat = chat();
        let msg = message("x");
        let out = Formatter::new(2000).format(&input(&listener, &chat, &msg)).unwrap();
        assert_eq!(out[0].payload.extra, extra);
    }

    #[test]
    fn pin_notice_allows_everyone() {
        let listener = Listener {
            name: Some("Pins".into()),
            ..Default::default()
        };
        let notice = Formatter::new(2000).pin_notice(&listener, &chat());
        assert_eq!(notice.payload.content, PIN_NOTICE);
        assert_eq!(notice.payload.username.as_deref(), Some("Pins"));
        assert_eq!(
            notice.payload.allowed_mentions,
            Some(AllowedMentions::everyone())
        );
    }

    #[test]
    fn split_short_text_is_untouched() {
        assert_eq!(split_message("short", 2000).unwrap(), vec!["short"]);
    }

    #[test]
    fn split_rejoins_to_original_within_cap() {
        let text = (0..300)
            .map(|i| format!("line number {} with some padding", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_message(&text, 500).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 500));
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn split_keeps_the_last_character() {
        let chunks = split_message("abc\ndef", 4).unwrap();
        assert_eq!(chunks, vec!["abc", "def"]);
    }

    #[test]
    fn split_counts_characters_not_bytes() {
        let text = "ééé\nééé";
        assert_eq!(split_message(text, 7).unwrap(), vec![text]);
        assert_eq!(split_message(text, 3).unwrap(), vec!["ééé", "ééé"]);
    }

    #[test]
    fn split_rejects_oversized_line() {
        let err = split_message(&format!("ok\n{}", "x".repeat(11)), 10).unwrap_err();
        assert!(matches!(
            err,
            DomainError::OversizedChunk { length: 11, max: 10 }
        ));
    }

    #[test]
    fn oversized_line_fails_format() {
        let listener = Listener {
            show_user: true,
            ..Default::default()
        };
        let chat = chat();
        let msg = message(&"x".repeat(50));
        assert!(Formatter::new(20).format(&input(&listener, &chat, &msg)).is_err());
    }
}
