//! Listener matcher: decides which listeners fire for a message.
//!
//! Gates run cheapest first. `prefilter` needs only the message itself;
//! `route` needs the chat kind and, for some listeners, the reply and topic,
//! which the caller fetches only when a candidate survived the prefilter.

use crate::domain::{ChannelTarget, ChatInfo, ChatKind, Listener, Message};
use crate::shared::config::MessageSettings;
use std::sync::Arc;
use tracing::debug;

/// Which handler a chat is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Forum,
    Linked,
    Group,
}

impl Branch {
    pub fn of(chat: &ChatInfo) -> Self {
        match chat.kind {
            ChatKind::Forum { .. } => Branch::Forum,
            ChatKind::LinkedChannel { .. } => Branch::Linked,
            ChatKind::Group { .. } | ChatKind::DirectMessage { .. } => Branch::Group,
        }
    }
}

/// A listener that passed the prefilter.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    pub listener: Arc<Listener>,
}

/// Everything the routing stage looks at.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext<'a> {
    pub message: &'a Message,
    pub chat: &'a ChatInfo,
    /// The message being replied to, if any and resolvable.
    pub reply: Option<&'a Message>,
    /// The topic-creation message of a forum topic, if any.
    pub topic: Option<&'a Message>,
}

impl RouteContext<'_> {
    fn topic_title(&self) -> Option<&str> {
        self.topic.and_then(|t| t.topic_title.as_deref())
    }
}

/// A listener that fires, with its resolved destination.
#[derive(Debug, Clone)]
pub struct Route {
    pub index: usize,
    pub listener: Arc<Listener>,
    pub channel: Option<ChannelTarget>,
    pub webhook: String,
}

impl Route {
    pub fn label(&self) -> String {
        self.listener.label(self.index)
    }
}

type Gate = Result<(), &'static str>;

pub struct ListenerMatcher {
    listeners: Vec<Arc<Listener>>,
    blacklist: Vec<String>,
    commands_default: bool,
}

impl ListenerMatcher {
    pub fn new(listeners: Vec<Listener>, settings: &MessageSettings) -> Self {
        Self {
            listeners: listeners.into_iter().map(Arc::new).collect(),
            blacklist: settings.blacklist.clone(),
            commands_default: settings.commands,
        }
    }

    pub fn listeners(&self) -> &[Arc<Listener>] {
        &self.listeners
    }

    /// Operator blacklist. A hit drops the message for every listener.
    pub fn is_globally_blacklisted(&self, message: &Message) -> bool {
        message
            .author
            .as_ref()
            .is_some_and(|a| a.matches_any(&self.blacklist))
    }

    /// Steps 1-3: global blacklist, audience, command suppression.
    pub fn prefilter(&self, message: &Message) -> Vec<Candidate> {
        if self.is_globally_blacklisted(message) {
            debug!(
                chat_id = message.chat_id,
                msg_id = message.id,
                "author is blacklisted; dropping message"
            );
            return Vec::new();
        }

        self.listeners
            .iter()
            .enumerate()
            .filter(|(index, listener)| {
                let verdict = audience_gate(listener, message)
                    .and_then(|_| self.command_gate(listener, message));
                log_skip(listener, *index, message, verdict)
            })
            .map(|(index, listener)| Candidate {
                index,
                listener: Arc::clone(listener),
            })
            .collect()
    }

    /// Steps 4-6: topology, per-branch gates, forum channel, destination.
    pub fn route(&self, candidates: &[Candidate], ctx: &RouteContext<'_>) -> Vec<Route> {
        let branch = Branch::of(ctx.chat);
        candidates
            .iter()
            .filter_map(|candidate| {
                let listener = &candidate.listener;
                let verdict = topology_gate(listener, branch)
                    .and_then(|_| branch_gates(listener, ctx));
                if !log_skip(listener, candidate.index, ctx.message, verdict) {
                    return None;
                }

                let channel = match resolve_channel(listener, branch, ctx) {
                    Ok(channel) => channel,
                    Err(reason) => {
                        log_skip(listener, candidate.index, ctx.message, Err(reason));
                        return None;
                    }
                };
                let Some(webhook) = listener.destination(channel) else {
                    log_skip(listener, candidate.index, ctx.message, Err("no destination"));
                    return None;
                };

                Some(Route {
                    index: candidate.index,
                    listener: Arc::clone(listener),
                    channel: channel.cloned(),
                    webhook: webhook.to_string(),
                })
            })
            .collect()
    }

    /// Full match over a fully populated context.
    pub fn match_message(&self, ctx: &RouteContext<'_>) -> Vec<Route> {
        let candidates = self.prefilter(ctx.message);
        self.route(&candidates, ctx)
    }

    fn command_gate(&self, listener: &Listener, message: &Message) -> Gate {
        if message.is_command() && !listener.allows_commands(self.commands_default) {
            return Err("commands disabled");
        }
        Ok(())
    }
}

/// Whether any candidate needs the reply target to be resolved.
pub fn needs_reply(candidates: &[Candidate]) -> bool {
    candidates.iter().any(|c| {
        let l = &c.listener;
        l.replies_only
            || !l.replying_to.is_empty()
            || l.shows_replies()
            || l.use_reply_user_instead_of_author
            || matches!(l.embedded, Some(crate::domain::Embedded::Users(_)))
    })
}

/// Whether the topic-creation message must be fetched.
pub fn needs_topic(candidates: &[Candidate], chat: &ChatInfo) -> bool {
    chat.is_forum() && candidates.iter().any(|c| !c.listener.channels.is_empty())
}

fn audience_gate(listener: &Listener, message: &Message) -> Gate {
    let author = message.author.as_ref();
    if author.is_some_and(|a| a.matches_any(&listener.blacklisted_users)) {
        return Err("author blacklisted for listener");
    }
    if let Some(users) = listener.users.as_ref().filter(|u| !u.is_empty()) {
        if !author.is_some_and(|a| a.matches_any(users)) {
            return Err("author not in users");
        }
    }
    if let Some(group) = listener.group {
        if group != message.chat_id {
            return Err("different group");
        }
    }
    Ok(())
}

fn topology_gate(listener: &Listener, branch: Branch) -> Gate {
    if listener.is_user_only() {
        return Ok(());
    }
    let fits = match branch {
        Branch::Forum => listener.forum,
        Branch::Linked => listener.linked,
        Branch::Group => !listener.forum && !listener.linked,
    };
    if fits { Ok(()) } else { Err("topology mismatch") }
}

fn branch_gates(listener: &Listener, ctx: &RouteContext<'_>) -> Gate {
    let message = ctx.message;
    let chat_id = ctx.chat.id;

    if listener.whitelist_only {
        if !listener.whitelist.contains(&chat_id) {
            return Err("chat not whitelisted");
        }
    } else if listener.blacklist.contains(&chat_id) {
        return Err("chat blacklisted");
    }

    if message.has_sticker && !listener.allows_stickers() {
        return Err("stickers disabled");
    }

    if ctx.chat.is_dm() && !listener.allow_dms {
        return Err("direct messages disabled");
    }

    if !listener
        .has_content
        .iter()
        .all(|needle| message.raw_text.contains(needle.as_str()))
    {
        return Err("missing required content");
    }

    if listener.exclude_empty_messages && message.raw_text.trim().is_empty() {
        return Err("empty message");
    }

    let reply_author = ctx.reply.and_then(|r| r.author.as_ref());
    if listener.replies_only && reply_author.is_none() {
        return Err("not a reply");
    }
    if !listener.replying_to.is_empty()
        && !reply_author.is_some_and(|a| a.matches_any(&listener.replying_to))
    {
        return Err("not replying to a tracked user");
    }

    if message.is_edit && !listener.tracks_edits() {
        return Err("edits not tracked");
    }

    Ok(())
}

/// Forum listeners with channels route by topic title; `main` takes messages
/// outside any topic. A topic whose creation message couldn't be read, or no
/// matching channel, drops the listener.
fn resolve_channel<'a>(
    listener: &'a Listener,
    branch: Branch,
    ctx: &RouteContext<'_>,
) -> Result<Option<&'a ChannelTarget>, &'static str> {
    if branch != Branch::Forum || listener.channels.is_empty() {
        return Ok(None);
    }
    let title = ctx.topic_title();
    if title.is_none() && ctx.message.topic_id().is_some() {
        return Err("topic not resolved");
    }
    let channel = listener.channels.iter().find(|c| match title {
        Some(title) => c.name.as_deref() == Some(title),
        None => c.main,
    });
    channel.map(Some).ok_or("no channel for topic")
}

fn log_skip(listener: &Listener, index: usize, message: &Message, verdict: Gate) -> bool {
    match verdict {
        Ok(()) => true,
        Err(reason) => {
            debug!(
                listener = %listener.label(index),
                chat_id = message.chat_id,
                msg_id = message.id,
                reason,
                "listener skipped"
            );
            false
        }
    }
}
