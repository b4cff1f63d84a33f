//! Port traits. API boundaries for the hexagon.
//!
//! - Inbound: Called by the Telegram adapter into the application
//! - Outbound: Called by application into infrastructure

pub mod inbound;
pub mod outbound;

pub use inbound::UpdateHandler;
pub use outbound::{
    AuthPort, FingerprintStore, MirrorPort, MirroredMessage, MirroredReply, PromptPort,
    SignInResult, TgGateway, WebhookPort,
};
