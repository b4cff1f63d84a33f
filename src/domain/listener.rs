//! Listener: an operator-authored routing and rendering rule.
//!
//! Loaded once from the relay config file and shared read-only afterwards.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Keys are snake_case; the camelCase spellings of older relay documents are
/// accepted as aliases. Unknown keys are rejected so a typo can't silently
/// switch a gate off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Listener {
    /// Explicit display name for the webhook identity. Also used in logs.
    pub name: Option<String>,

    // Source-chat scoping
    pub group: Option<i64>,
    pub whitelist: Vec<i64>,
    pub blacklist: Vec<i64>,
    #[serde(alias = "whitelistOnly")]
    pub whitelist_only: bool,

    // Audience scoping
    pub users: Option<Vec<String>>,
    #[serde(alias = "blacklistedUsers")]
    pub blacklisted_users: Vec<String>,

    // Channel topology
    pub forum: bool,
    pub linked: bool,
    #[serde(alias = "allow_dm", alias = "allowDMs")]
    pub allow_dms: bool,

    // Content gating
    #[serde(alias = "hasContent")]
    pub has_content: Vec<String>,
    pub commands: Option<bool>,
    pub stickers: Option<bool>,
    #[serde(alias = "excludeEmptyMessages")]
    pub exclude_empty_messages: bool,
    #[serde(alias = "replyingTo")]
    pub replying_to: Vec<String>,
    #[serde(alias = "repliesOnly")]
    pub replies_only: bool,

    // Rendering
    pub embeds: Option<bool>,
    pub embedded: Option<Embedded>,
    #[serde(alias = "embedColor")]
    pub embed_color: Option<u32>,
    #[serde(alias = "dontEmbedSingularLinks")]
    pub dont_embed_singular_links: bool,
    #[serde(alias = "showUser")]
    pub show_user: bool,
    #[serde(alias = "showReplies")]
    pub show_replies: Option<bool>,
    #[serde(alias = "useReplyUserInsteadOfAuthor")]
    pub use_reply_user_instead_of_author: bool,
    #[serde(alias = "includeForumChannelName")]
    pub include_forum_channel_name: bool,
    pub mention: bool,
    pub remove: Vec<String>,
    pub replacements: Replacements,
    #[serde(alias = "allowedEmbeds")]
    pub allowed_embeds: Vec<String>,
    #[serde(alias = "extraWebhookParameters")]
    pub extra_webhook_parameters: Option<serde_json::Map<String, serde_json::Value>>,

    // Forwarding, pins, edits
    #[serde(alias = "forwardTo")]
    pub forward_to: Option<String>,
    pub pins: bool,
    #[serde(alias = "trackEdits")]
    pub track_edits: Option<bool>,

    // Destination
    pub webhook: Option<String>,
    pub channels: Vec<ChannelTarget>,
}

/// Per-topic destination of a forum listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelTarget {
    pub name: Option<String>,
    #[serde(default)]
    pub main: bool,
    pub webhook: String,
}

/// `embedded: true` embeds every message; a list embeds only messages whose
/// author (or reply author) is in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Embedded {
    Bool(bool),
    Users(Vec<String>),
}

impl Listener {
    /// Name for log lines; falls back to the scoped group or declaration index.
    pub fn label(&self, index: usize) -> String {
        match (&self.name, self.group) {
            (Some(name), _) => name.clone(),
            (None, Some(group)) => format!("group:{}", group),
            (None, None) => format!("listener#{}", index),
        }
    }

    /// "User-only" listeners have no group but an audience; they ignore topology.
    pub fn is_user_only(&self) -> bool {
        self.group.is_none() && self.users.as_ref().is_some_and(|u| !u.is_empty())
    }

    pub fn tracks_edits(&self) -> bool {
        self.track_edits.unwrap_or(true)
    }

    pub fn allows_stickers(&self) -> bool {
        self.stickers.unwrap_or(true)
    }

    pub fn shows_replies(&self) -> bool {
        self.show_replies.unwrap_or(true)
    }

    pub fn allows_commands(&self, global_default: bool) -> bool {
        self.commands.unwrap_or(global_default)
    }

    /// Exactly one destination per (listener, topic): the matched channel's
    /// webhook or the listener default.
    pub fn destination<'a>(&'a self, channel: Option<&'a ChannelTarget>) -> Option<&'a str> {
        channel
            .map(|c| c.webhook.as_str())
            .or(self.webhook.as_deref())
    }
}

/// Ordered substring replacements. Document order is preserved; a later
/// identical key overwrites the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Replacements(Vec<(String, String)>);

impl Replacements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subject: impl Into<String>, replacement: impl Into<String>) {
        let subject = subject.into();
        let replacement = replacement.into();
        match self.0.iter_mut().find(|(s, _)| *s == subject) {
            Some(entry) => entry.1 = replacement,
            None => self.0.push((subject, replacement)),
        }
    }

    /// Global entries first, then this listener's; listener keys win.
    pub fn merged_over(&self, base: &Replacements) -> Replacements {
        let mut merged = base.clone();
        for (subject, replacement) in &self.0 {
            merged.insert(subject.clone(), replacement.clone());
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(s, r)| (s.as_str(), r.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Replacements {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Replacements;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of subject -> replacement")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Replacements::new();
                while let Some((subject, replacement)) = map.next_entry::<String, String>()? {
                    out.insert(subject, replacement);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_embedded_bool_or_list() {
        let l: Listener = serde_json::from_str(r#"{"embedded": true}"#).unwrap();
        assert_eq!(l.embedded, Some(Embedded::Bool(true)));

        let l: Listener = serde_json::from_str(r#"{"embedded": ["alice", "bob"]}"#).unwrap();
        assert_eq!(
            l.embedded,
            Some(Embedded::Users(vec!["alice".into(), "bob".into()]))
        );
    }

    #[test]
    fn accepts_camel_case_keys() {
        let l: Listener = serde_json::from_str(
            r#"{"blacklistedUsers": ["bob"], "whitelistOnly": true, "allowDMs": true, "showUser": true}"#,
        )
        .unwrap();
        assert_eq!(l.blacklisted_users, vec!["bob"]);
        assert!(l.whitelist_only);
        assert!(l.allow_dms);
        assert!(l.show_user);
    }

    #[test]
    fn rejects_unknown_listener_keys() {
        let err = serde_json::from_str::<Listener>(r#"{"blacklisted_user": ["bob"]}"#).unwrap_err();
        assert!(err.to_string().contains("blacklisted_user"));

        let err = serde_json::from_str::<ChannelTarget>(r#"{"webhook": "https://h", "mian": true}"#)
            .unwrap_err();
        assert!(err.to_string().contains("mian"));
    }

    #[test]
    fn replacements_keep_document_order_and_last_key_wins() {
        let r: Replacements =
            serde_json::from_str(r#"{"zeta": "1", "alpha": "2", "zeta": "3"}"#).unwrap();
        let pairs: Vec<_> = r.iter().collect();
        assert_eq!(pairs, vec![("zeta", "3"), ("alpha", "2")]);
    }

    #[test]
    fn listener_replacements_override_global_keys() {
        let mut global = Replacements::new();
        global.insert("foo", "global");
        global.insert("bar", "keep");
        let mut local = Replacements::new();
        local.insert("foo", "local");
        local.insert("baz", "new");

        let merged = local.merged_over(&global);
        let pairs: Vec<_> = merged.iter().collect();
        assert_eq!(pairs, vec![("foo", "local"), ("bar", "keep"), ("baz", "new")]);
    }

    #[test]
    fn destination_prefers_channel_webhook() {
        let listener = Listener {
            webhook: Some("https://default".into()),
            ..Default::default()
        };
        let channel = ChannelTarget {
            name: Some("news".into()),
            main: false,
            webhook: "https://news".into(),
        };
        assert_eq!(listener.destination(Some(&channel)), Some("https://news"));
        assert_eq!(listener.destination(None), Some("https://default"));
    }

    #[test]
    fn defaults_are_permissive_for_edits_stickers_replies() {
        let l = Listener::default();
        assert!(l.tracks_edits());
        assert!(l.allows_stickers());
        assert!(l.shows_replies());
        assert!(l.allows_commands(true));
        assert!(!l.allows_commands(false));
        assert!(!l.is_user_only());
    }
}
