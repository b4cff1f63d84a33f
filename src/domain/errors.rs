//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Telegram gateway error: {0}")]
    TgGateway(String),

    #[error("Repository error: {0}")]
    Repo(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Media download failed: {0}")]
    Media(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid remove pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Webhook returned {status}: {body}")]
    Webhook { status: u16, body: String },

    #[error("Webhook transport error: {0}")]
    Transport(String),

    /// Destination asked us to back off. Caller may retry after the delay.
    #[error("Rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// A single newline-free run is longer than the destination allows.
    #[error("Content chunk of {length} characters exceeds the {max} character limit")]
    OversizedChunk { length: usize, max: usize },
}

impl DomainError {
    /// Stable variant name for error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::TgGateway(_) => "TgGateway",
            DomainError::Repo(_) => "Repo",
            DomainError::Auth(_) => "Auth",
            DomainError::Media(_) => "Media",
            DomainError::Config(_) => "Config",
            DomainError::InvalidPattern { .. } => "InvalidPattern",
            DomainError::Webhook { .. } => "Webhook",
            DomainError::Transport(_) => "Transport",
            DomainError::RateLimited { .. } => "RateLimited",
            DomainError::OversizedChunk { .. } => "OversizedChunk",
        }
    }
}
