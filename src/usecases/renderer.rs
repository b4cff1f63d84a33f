//! Content renderer: raw Telegram text + entities -> Discord markdown.
//!
//! Link entities become `[label](url)`, then replacements and remove patterns
//! run, then bare links are wrapped in `<...>` when previews are off.

use crate::domain::{DomainError, Listener, Replacements, TextEntity};
use crate::shared::config::MessageSettings;
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;
use tracing::debug;

static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<>\[\]]+").expect("invalid bare url regex"));

/// Trailing characters that end a sentence rather than a URL.
const URL_TRAILING_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '\'', '"'];

/// Per-listener rendering rules, compiled once at startup.
#[derive(Debug, Clone)]
pub struct RenderRules {
    global_embeds: bool,
    listener_embeds: Option<bool>,
    allowed_embeds: Vec<String>,
    replacements: Replacements,
    remove: Vec<Regex>,
}

impl RenderRules {
    pub fn for_listener(listener: &Listener, settings: &MessageSettings) -> Result<Self, DomainError> {
        let mut allowed_embeds = settings.allowed_embeds.clone();
        allowed_embeds.extend(listener.allowed_embeds.iter().cloned());
        let remove = listener
            .remove
            .iter()
            .map(|p| compile_remove_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            global_embeds: settings.embeds,
            listener_embeds: listener.embeds,
            allowed_embeds,
            replacements: listener.replacements.merged_over(&settings.replacements),
            remove,
        })
    }

    /// Rules with only the global settings applied.
    pub fn global(settings: &MessageSettings) -> Self {
        Self {
            global_embeds: settings.embeds,
            listener_embeds: None,
            allowed_embeds: settings.allowed_embeds.clone(),
            replacements: settings.replacements.clone(),
            remove: Vec::new(),
        }
    }

    /// Listener toggle overrides the global default.
    pub fn previews_enabled(&self) -> bool {
        self.listener_embeds.unwrap_or(self.global_embeds)
    }

    fn is_allowed_domain(&self, url: &str) -> bool {
        self.allowed_embeds
            .iter()
            .any(|domain| !domain.is_empty() && url.contains(domain.as_str()))
    }

    /// Allow-list wins over the listener toggle, which wins over the global default.
    pub fn embeds_url(&self, url: &str) -> bool {
        self.is_allowed_domain(url) || self.previews_enabled()
    }
}

/// `*` matches a run of non-whitespace; everything else is literal.
pub fn compile_remove_pattern(pattern: &str) -> Result<Regex, DomainError> {
    let source = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\S*");
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|e| DomainError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Render a message body for one listener.
pub fn render(raw_text: &str, entities: &[TextEntity], rules: &RenderRules) -> String {
    let mut content = substitute_links(raw_text, entities, rules);

    for (subject, replacement) in rules.replacements.iter() {
        if !subject.is_empty() {
            content = content.replace(subject, replacement);
        }
    }

    for pattern in &rules.remove {
        content = pattern.replace_all(&content, "").into_owned();
    }

    if !rules.previews_enabled() {
        content = suppress_bare_links(&content, rules);
    }

    content
}

/// Shift applied by an already substituted entity.
struct Shift {
    original_offset: usize,
    delta: isize,
}

fn substitute_links(raw_text: &str, entities: &[TextEntity], rules: &RenderRules) -> String {
    let mut links: Vec<&TextEntity> = entities.iter().filter(|e| e.is_link()).collect();
    // Highest offset first so earlier substitutions never move unprocessed spans.
    links.sort_by(|a, b| b.offset.cmp(&a.offset));

    let mut content = raw_text.to_string();
    let mut shifts: Vec<Shift> = Vec::new();

    for entity in links {
        let delta: isize = shifts
            .iter()
            .filter(|s| s.original_offset < entity.offset)
            .map(|s| s.delta)
            .sum();
        let Some(offset) = entity.offset.checked_add_signed(delta) else {
            debug!(offset = entity.offset, "entity offset underflow; skipping");
            continue;
        };
        let Some((start, end)) = utf16_span(&content, offset, entity.length) else {
            debug!(
                offset = entity.offset,
                length = entity.length,
                "entity span out of range; skipping"
            );
            continue;
        };

        let name = &content[start..end];
        let url = entity.url.as_deref().unwrap_or(name);
        if name == url || name.starts_with("http") {
            continue;
        }

        let target = if rules.embeds_url(url) {
            url.to_string()
        } else {
            format!("<{}>", url)
        };
        let replacement = format!("[{}]({})", name, target);

        shifts.push(Shift {
            original_offset: entity.offset,
            delta: utf16_len(&replacement) as isize - entity.length as isize,
        });
        content.replace_range(start..end, &replacement);
    }

    content
}

fn suppress_bare_links(content: &str, rules: &RenderRules) -> String {
    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;

    for found in BARE_URL.find_iter(content) {
        let url = trim_url(found.as_str());
        let start = found.start();
        let end = start + url.len();
        let bracketed = content[..start].ends_with('<');
        if bracketed || rules.is_allowed_domain(url) {
            continue;
        }
        out.push_str(&content[cursor..start]);
        out.push('<');
        out.push_str(url);
        out.push('>');
        cursor = end;
    }

    out.push_str(&content[cursor..]);
    out
}

/// Drop sentence punctuation and unbalanced closing parens from the end of a
/// matched URL. `Rust_(language)` keeps its paren; `(see https://x.com)` doesn't.
fn trim_url(found: &str) -> &str {
    let mut url = found;
    loop {
        let trimmed = url.trim_end_matches(URL_TRAILING_PUNCTUATION);
        let unbalanced =
            trimmed.ends_with(')') && trimmed.matches(')').count() > trimmed.matches('(').count();
        if unbalanced {
            url = &trimmed[..trimmed.len() - 1];
        } else {
            return trimmed;
        }
    }
}

/// True when the whole message is a single bare link.
pub fn is_single_link(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return false;
    }
    BARE_URL
        .find(trimmed)
        .is_some_and(|m| m.start() == 0 && trim_url(m.as_str()).len() == trimmed.len())
}

fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Map a UTF-16 `[offset, offset + length)` span onto byte indices of `s`.
/// Returns `None` when the span is out of range or splits a surrogate pair.
fn utf16_span(s: &str, offset: usize, length: usize) -> Option<(usize, usize)> {
    let start = utf16_to_byte(s, offset)?;
    let end = start + utf16_to_byte(&s[start..], length)?;
    Some((start, end))
}

fn utf16_to_byte(s: &str, units: usize) -> Option<usize> {
    let mut seen = 0;
    for (idx, ch) in s.char_indices() {
        if seen == units {
            return Some(idx);
        }
        seen += ch.len_utf16();
        if seen > units {
            return None;
        }
    }
    (seen == units).then_some(s.len())
}
