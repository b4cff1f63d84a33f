//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    Attachment, ChatInfo, DomainError, MediaReference, Message, WebhookPayload,
};

/// Telegram API gateway. Chat/message lookup, media, forwarding.
#[async_trait::async_trait]
pub trait TgGateway: Send + Sync {
    /// All dialogs the account participates in (used for the startup listing).
    async fn get_dialogs(&self) -> Result<Vec<ChatInfo>, DomainError>;

    /// Resolve a chat id to its kind and title.
    async fn get_chat(&self, chat_id: i64) -> Result<ChatInfo, DomainError>;

    /// Fetch messages by id with authors resolved. Missing ids are omitted.
    async fn get_messages(&self, chat_id: i64, ids: &[i32]) -> Result<Vec<Message>, DomainError>;

    /// Download media into memory.
    async fn download_media(&self, media_ref: &MediaReference) -> Result<Vec<u8>, DomainError>;

    /// Forward a message to another chat (`destination` is an id or username).
    async fn forward_message(
        &self,
        chat_id: i64,
        message_id: i32,
        destination: &str,
    ) -> Result<(), DomainError>;
}

/// Destination webhook transport. One HTTP call, no retries.
///
/// Returns `DomainError::RateLimited` on 429 so callers can back off.
#[async_trait::async_trait]
pub trait WebhookPort: Send + Sync {
    async fn execute(
        &self,
        url: &str,
        payload: &WebhookPayload,
        files: &[Attachment],
    ) -> Result<(), DomainError>;
}

/// Fingerprint store. Latest content hash per (chat, message).
#[async_trait::async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn get(&self, chat_id: i64, message_id: i32) -> Result<Option<String>, DomainError>;

    /// Insert or replace the fingerprint.
    async fn put(&self, chat_id: i64, message_id: i32, fingerprint: &str)
    -> Result<(), DomainError>;
}

/// Side-channel mirror of relayed messages. Not a system of record.
#[async_trait::async_trait]
pub trait MirrorPort: Send + Sync {
    async fn record(&self, message: MirroredMessage) -> Result<(), DomainError>;
}

/// What the mirror keeps for each relayed message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MirroredMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub author: Option<String>,
    pub content: String,
    pub reply: Option<MirroredReply>,
    pub time: i64,
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MirroredReply {
    pub message_id: i32,
    pub author: Option<String>,
    pub content: String,
}

/// Auth port. Login handshake (phone -> code -> 2FA).
#[async_trait::async_trait]
pub trait AuthPort: Send + Sync {
    async fn is_authenticated(&self) -> Result<bool, DomainError>;

    async fn request_login_code(&self, phone: &str, api_hash: &str) -> Result<(), DomainError>;

    async fn sign_in(&self, code: &str) -> Result<SignInResult, DomainError>;

    async fn check_password(&self, password: &[u8]) -> Result<(), DomainError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInResult {
    Success,
    PasswordRequired { hint: Option<String> },
}

/// Interactive operator input used during login.
#[async_trait::async_trait]
pub trait PromptPort: Send + Sync {
    /// Ask a question; `secret` hides the answer while typing.
    async fn ask(&self, question: &str, secret: bool) -> Result<String, DomainError>;
}
