//! Delivery: serialized per-destination webhook sends with one rate-limit retry.

use crate::domain::{Attachment, DomainError, OutboundPayload};
use crate::ports::WebhookPort;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Upper bound on a single rate-limit sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct DeliveryService {
    webhook: Arc<dyn WebhookPort>,
    /// One lock per destination URL; sends to one webhook never interleave.
    lanes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeliveryService {
    pub fn new(webhook: Arc<dyn WebhookPort>) -> Self {
        Self {
            webhook,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    async fn lane(&self, url: &str) -> Arc<Mutex<()>> {
        let mut lanes = self.lanes.lock().await;
        Arc::clone(lanes.entry(url.to_string()).or_default())
    }

    /// Send payloads in order. Stops at the first failed payload so later
    /// chunks never arrive without earlier ones.
    pub async fn deliver(
        &self,
        url: &str,
        payloads: &[OutboundPayload],
        files: &[Attachment],
    ) -> Result<(), DomainError> {
        let lane = self.lane(url).await;
        let _guard = lane.lock().await;

        for outbound in payloads {
            let attached: &[Attachment] = if outbound.attach_files { files } else { &[] };
            self.send_once_with_retry(url, outbound, attached).await?;
        }
        info!(webhook = %redact(url), sends = payloads.len(), "delivered");
        Ok(())
    }

    async fn send_once_with_retry(
        &self,
        url: &str,
        outbound: &OutboundPayload,
        files: &[Attachment],
    ) -> Result<(), DomainError> {
        match self.webhook.execute(url, &outbound.payload, files).await {
            Err(DomainError::RateLimited { retry_after }) => {
                let wait = retry_after.min(MAX_BACKOFF);
                warn!(webhook = %redact(url), wait_ms = wait.as_millis() as u64, "rate limited, sleeping");
                tokio::time::sleep(wait).await;
                self.webhook.execute(url, &outbound.payload, files).await
            }
            other => other,
        }
    }
}

/// Webhook URLs carry a token; keep it out of logs.
pub fn redact(url: &str) -> String {
    match url.rfind('/') {
        Some(idx) if idx + 1 < url.len() => format!("{}/***", &url[..idx]),
        _ => url.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::WebhookPayload;
    use std::sync::Mutex as StdMutex;

    /// Records every execute call; fails with the queued errors first.
    #[derive(Default)]
    pub(crate) struct RecordingWebhook {
        pub calls: StdMutex<Vec<(String, WebhookPayload, usize)>>,
        pub failures: StdMutex<Vec<DomainError>>,
    }

    impl RecordingWebhook {
        pub fn failing_with(errors: Vec<DomainError>) -> Self {
            Self {
                calls: StdMutex::default(),
                failures: StdMutex::new(errors),
            }
        }

        pub fn contents(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, p, _)| p.content.clone())
                .collect()
        }

        pub fn count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl WebhookPort for RecordingWebhook {
        async fn execute(
            &self,
            url: &str,
            payload: &WebhookPayload,
            files: &[Attachment],
        ) -> Result<(), DomainError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone(), files.len()));
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.remove(0))
            }
        }
    }

    fn payload(content: &str, attach_files: bool) -> OutboundPayload {
        OutboundPayload {
            payload: WebhookPayload {
                content: content.to_string(),
                ..Default::default()
            },
            attach_files,
        }
    }

    fn file() -> Attachment {
        Attachment {
            name: "a.jpg".into(),
            mime_type: "image/jpeg".into(),
            data: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn files_go_only_with_flagged_payload() {
        let hook = Arc::new(RecordingWebhook::default());
        let svc = DeliveryService::new(hook.clone());
        svc.deliver(
            "https://hooks/1",
            &[payload("a", false), payload("", true)],
            &[file()],
        )
        .await
        .unwrap();

        let calls = hook.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].2, 0);
        assert_eq!(calls[1].2, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_once() {
        let hook = Arc::new(RecordingWebhook::failing_with(vec![
            DomainError::RateLimited {
                retry_after: Duration::from_millis(1500),
            },
        ]));
        let svc = DeliveryService::new(hook.clone());
        svc.deliver("https://hooks/1", &[payload("a", false)], &[])
            .await
            .unwrap();
        assert_eq!(hook.contents(), vec!["a", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_rate_limit_gives_up() {
        let limited = || DomainError::RateLimited {
            retry_after: Duration::from_millis(10),
        };
        let hook = Arc::new(RecordingWebhook::failing_with(vec![limited(), limited()]));
        let svc = DeliveryService::new(hook.clone());
        let err = svc
            .deliver("https://hooks/1", &[payload("a", false), payload("b", false)], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::RateLimited { .. }));
        // "b" never went out.
        assert_eq!(hook.contents(), vec!["a", "a"]);
    }

    #[tokio::test]
    async fn transport_error_is_not_retried() {
        let hook = Arc::new(RecordingWebhook::failing_with(vec![DomainError::Webhook {
            status: 400,
            body: "bad".into(),
        }]));
        let svc = DeliveryService::new(hook.clone());
        assert!(svc
            .deliver("https://hooks/1", &[payload("a", false)], &[])
            .await
            .is_err());
        assert_eq!(hook.count(), 1);
    }

    #[tokio::test]
    async fn same_destination_is_serialized() {
        let hook = Arc::new(RecordingWebhook::default());
        let svc = Arc::new(DeliveryService::new(hook.clone()));
        let batch = |tag: &str| {
            (0..5)
                .map(|i| payload(&format!("{}{}", tag, i), false))
                .collect::<Vec<_>>()
        };
        let (a, b) = (batch("a"), batch("b"));
        let (s1, s2) = (svc.clone(), svc.clone());
        let (r1, r2) = tokio::join!(
            async move { s1.deliver("https://hooks/1", &a, &[]).await },
            async move { s2.deliver("https://hooks/1", &b, &[]).await },
        );
        r1.unwrap();
        r2.unwrap();

        let contents = hook.contents();
        let first_tag = &contents[0][..1];
        assert!(contents[..5].iter().all(|c| c.starts_with(first_tag)));
    }

    #[test]
    fn redacts_token() {
        assert_eq!(
            redact("https://discord.com/api/webhooks/1/secret"),
            "https://discord.com/api/webhooks/1/***"
        );
    }
}
