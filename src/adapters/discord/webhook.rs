//! Implements WebhookPort with reqwest.
//!
//! Text-only payloads go as JSON; payloads with files go as multipart with
//! `payload_json` followed by `file1..fileN`.

use crate::domain::{Attachment, DomainError, WebhookPayload};
use crate::ports::WebhookPort;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Used when a 429 carries no usable delay.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Error bodies are truncated before they reach logs.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    /// Seconds, fractional.
    retry_after: f64,
}

pub struct DiscordWebhook {
    client: Client,
}

impl DiscordWebhook {
    pub fn new(timeout: Duration) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Transport(format!("build http client: {}", e)))?;
        Ok(Self { client })
    }

    fn form(payload: &WebhookPayload, files: &[Attachment]) -> Result<Form, DomainError> {
        let json = serde_json::to_string(payload)
            .map_err(|e| DomainError::Transport(format!("encode payload: {}", e)))?;
        let mut form = Form::new().text("payload_json", json);
        for (i, file) in files.iter().enumerate() {
            let part = Part::bytes(file.data.clone())
                .file_name(file.name.clone())
                .mime_str(&file.mime_type)
                .map_err(|e| DomainError::Transport(format!("attachment {}: {}", file.name, e)))?;
            form = form.part(format!("file{}", i + 1), part);
        }
        Ok(form)
    }
}

#[async_trait]
impl WebhookPort for DiscordWebhook {
    async fn execute(
        &self,
        url: &str,
        payload: &WebhookPayload,
        files: &[Attachment],
    ) -> Result<(), DomainError> {
        let request = self.client.post(url);
        let request = if files.is_empty() {
            request.json(payload)
        } else {
            request.multipart(Self::form(payload, files)?)
        };

        let response = request
            .send()
            .await
            .map_err(|e| DomainError::Transport(e.without_url().to_string()))?;
        check_response(response).await
    }
}

async fn check_response(response: Response) -> Result<(), DomainError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let header_delay = parse_retry_after_header(&response);
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = serde_json::from_str::<RateLimitBody>(&body)
            .ok()
            .and_then(|b| seconds(b.retry_after))
            .or(header_delay)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(DomainError::RateLimited { retry_after });
    }

    let body = if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated]", &body[..cut])
    } else {
        body
    };
    Err(DomainError::Webhook {
        status: status.as_u16(),
        body,
    })
}

fn parse_retry_after_header(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .and_then(seconds)
}

fn seconds(value: f64) -> Option<Duration> {
    (value.is_finite() && value >= 0.0).then(|| Duration::from_secs_f64(value))
}
