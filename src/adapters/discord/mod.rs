//! Discord destination. Execute-webhook over HTTP.

pub mod webhook;

pub use webhook::DiscordWebhook;
