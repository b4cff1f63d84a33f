//! Implements PromptPort with inquire.
//!
//! inquire blocks on the terminal, so each prompt runs on the blocking pool.

use crate::domain::DomainError;
use crate::ports::PromptPort;
use async_trait::async_trait;
use inquire::{Password, PasswordDisplayMode, Text};

#[derive(Default)]
pub struct InquirePrompt;

impl InquirePrompt {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PromptPort for InquirePrompt {
    async fn ask(&self, question: &str, secret: bool) -> Result<String, DomainError> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || {
            if secret {
                Password::new(&question)
                    .with_display_mode(PasswordDisplayMode::Masked)
                    .without_confirmation()
                    .prompt()
            } else {
                Text::new(&question).prompt()
            }
        })
        .await
        .map_err(|e| DomainError::Auth(format!("prompt task: {}", e)))?
        .map_err(|e| DomainError::Auth(e.to_string()))
    }
}
