//! Infrastructure adapters. Implement outbound ports.
//!
//! Telegram, Discord webhooks, storage, terminal prompts. Map errors to DomainError.

pub mod discord;
pub mod persistence;
pub mod telegram;
pub mod ui;
