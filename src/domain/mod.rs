//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;
pub mod listener;
pub mod payload;

pub use entities::{
    Attachment, Author, ChatInfo, ChatKind, EntityKind, InboundEvent, MediaReference, MediaType,
    Message, ReplyHeader, TextEntity,
};
pub use errors::DomainError;
pub use listener::{ChannelTarget, Embedded, Listener, Replacements};
pub use payload::{AllowedMentions, Embed, EmbedAuthor, OutboundPayload, WebhookPayload};
