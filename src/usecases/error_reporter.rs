//! Error reporter: posts process-level failures to a dedicated webhook.
//!
//! Best effort. A failure while reporting is logged and never reported again.

use crate::domain::{AllowedMentions, DomainError, WebhookPayload};
use crate::ports::WebhookPort;
use std::backtrace::Backtrace;
use std::panic::PanicHookInfo;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

/// Room left for the stack inside one webhook message.
const STACK_BUDGET: usize = 1500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub origin: String,
    pub cause: String,
    pub kind: String,
    pub stack: Option<String>,
}

impl ErrorReport {
    pub fn from_error(origin: impl Into<String>, err: &DomainError) -> Self {
        Self {
            origin: origin.into(),
            cause: err.to_string(),
            kind: err.kind().to_string(),
            stack: None,
        }
    }

    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let cause = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        let origin = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            origin,
            cause,
            kind: "panic".to_string(),
            stack: Some(Backtrace::force_capture().to_string()),
        }
    }

    /// Discord message body.
    pub fn render(&self) -> String {
        let mut out = format!(
            "**Relay error** in `{}`\n`{}`: {}",
            self.origin, self.kind, self.cause
        );
        if let Some(stack) = self.stack.as_deref().filter(|s| !s.trim().is_empty()) {
            let stack: String = stack.chars().take(STACK_BUDGET).collect();
            out.push_str("\n```\n");
            out.push_str(&stack);
            out.push_str("\n```");
        }
        out
    }
}

tokio::task_local! {
    /// Set while the worker is sending; anything reported from inside that
    /// send is the reporting path failing on itself.
    static SENDING: ();
}

struct Queued {
    report: ErrorReport,
    done: Option<oneshot::Sender<()>>,
}

/// Reports are queued to one worker task and sent in arrival order, so
/// concurrent failures are all delivered.
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<Queued>,
}

impl ErrorReporter {
    /// Spawns the sending worker; call from within the runtime.
    pub fn new(webhook: Arc<dyn WebhookPort>, url: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(webhook, url.into(), rx));
        Self { tx }
    }

    /// Queue a report and wait until it has been sent (or failed). Reports
    /// raised while a report is being sent are logged and dropped.
    pub async fn report(&self, report: ErrorReport) {
        if in_send() {
            warn!(origin = %report.origin, cause = %report.cause, "error while reporting; not reporting again");
            return;
        }
        let (done, sent) = oneshot::channel();
        let queued = Queued {
            report,
            done: Some(done),
        };
        if let Err(mpsc::error::SendError(queued)) = self.tx.send(queued) {
            warn!(origin = %queued.report.origin, cause = %queued.report.cause, "error reporter stopped; dropping report");
            return;
        }
        let _ = sent.await;
    }

    /// Install a panic hook that queues panics here. Keeps the previous
    /// hook so panics are still printed.
    pub fn install_panic_hook(&self) {
        let tx = self.tx.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);
            if in_send() {
                return;
            }
            let _ = tx.send(Queued {
                report: ErrorReport::from_panic(info),
                done: None,
            });
        }));
    }
}

fn in_send() -> bool {
    SENDING.try_with(|_| ()).is_ok()
}

async fn run_worker(
    webhook: Arc<dyn WebhookPort>,
    url: String,
    mut rx: mpsc::UnboundedReceiver<Queued>,
) {
    while let Some(Queued { report, done }) = rx.recv().await {
        let payload = WebhookPayload {
            username: Some("tg-relay".to_string()),
            content: report.render(),
            allowed_mentions: Some(AllowedMentions::none()),
            ..Default::default()
        };
        let sent = SENDING
            .scope((), async { webhook.execute(&url, &payload, &[]).await })
            .await;
        if let Err(e) = sent {
            error!(error = %e, origin = %report.origin, "failed to send error report");
        }
        if let Some(done) = done {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::delivery::tests::RecordingWebhook;

    #[test]
    fn render_includes_origin_kind_cause_and_stack() {
        let report = ErrorReport {
            origin: "message -100:5".into(),
            cause: "boom".into(),
            kind: "Webhook".into(),
            stack: Some("frame 1\nframe 2".into()),
        };
        let text = report.render();
        assert!(text.contains("`message -100:5`"));
        assert!(text.contains("`Webhook`: boom"));
        assert!(text.contains("```\nframe 1\nframe 2\n```"));
    }

    #[test]
    fn long_stacks_are_truncated() {
        let report = ErrorReport {
            origin: "x".into(),
            cause: "y".into(),
            kind: "panic".into(),
            stack: Some("s".repeat(10_000)),
        };
        assert!(report.render().chars().count() < 2000);
    }

    #[test]
    fn from_error_uses_variant_name() {
        let report = ErrorReport::from_error(
            "relay",
            &DomainError::OversizedChunk {
                length: 3000,
                max: 2000,
            },
        );
        assert_eq!(report.kind, "OversizedChunk");
        assert!(report.cause.contains("3000"));
    }

    #[tokio::test]
    async fn report_posts_to_error_webhook() {
        let hook = Arc::new(RecordingWebhook::default());
        let reporter = ErrorReporter::new(hook.clone(), "https://hooks/errors");
        reporter
            .report(ErrorReport::from_error("relay", &DomainError::Repo("down".into())))
            .await;

        let calls = hook.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://hooks/errors");
        assert!(calls[0].1.content.contains("Repository error: down"));
    }

    #[tokio::test]
    async fn failed_report_does_not_recurse() {
        let hook = Arc::new(RecordingWebhook::failing_with(vec![DomainError::Transport(
            "offline".into(),
        )]));
        let reporter = ErrorReporter::new(hook.clone(), "https://hooks/errors");
        reporter
            .report(ErrorReport::from_error("relay", &DomainError::Repo("down".into())))
            .await;
        assert_eq!(hook.count(), 1);

        // A failed send doesn't stop the worker.
        reporter
            .report(ErrorReport::from_error("relay", &DomainError::Repo("again".into())))
            .await;
        assert_eq!(hook.count(), 2);
    }

    struct SlowWebhook {
        inner: RecordingWebhook,
    }

    #[async_trait::async_trait]
    impl WebhookPort for SlowWebhook {
        async fn execute(
            &self,
            url: &str,
            payload: &WebhookPayload,
            files: &[crate::domain::Attachment],
        ) -> Result<(), DomainError> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.inner.execute(url, payload, files).await
        }
    }

    #[tokio::test]
    async fn concurrent_reports_are_all_delivered() {
        let hook = Arc::new(SlowWebhook {
            inner: RecordingWebhook::default(),
        });
        let reporter = ErrorReporter::new(hook.clone(), "https://hooks/errors");
        tokio::join!(
            reporter.report(ErrorReport::from_error("event a", &DomainError::Repo("a".into()))),
            reporter.report(ErrorReport::from_error("event b", &DomainError::Repo("b".into()))),
        );

        let contents = hook.inner.contents();
        assert_eq!(contents.len(), 2);
        assert!(contents.iter().any(|c| c.contains("event a")));
        assert!(contents.iter().any(|c| c.contains("event b")));
    }

    /// Reports again from inside its own send.
    struct ReentrantWebhook {
        reporter: std::sync::OnceLock<Arc<ErrorReporter>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl WebhookPort for ReentrantWebhook {
        async fn execute(
            &self,
            _url: &str,
            _payload: &WebhookPayload,
            _files: &[crate::domain::Attachment],
        ) -> Result<(), DomainError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if let Some(reporter) = self.reporter.get() {
                reporter
                    .report(ErrorReport::from_error("inner", &DomainError::Transport("x".into())))
                    .await;
            }
            Err(DomainError::Transport("offline".into()))
        }
    }

    #[tokio::test]
    async fn report_raised_while_sending_is_dropped() {
        let hook = Arc::new(ReentrantWebhook {
            reporter: std::sync::OnceLock::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let reporter = Arc::new(ErrorReporter::new(hook.clone(), "https://hooks/errors"));
        let _ = hook.reporter.set(Arc::clone(&reporter));

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            reporter.report(ErrorReport::from_error("outer", &DomainError::Repo("down".into()))),
        )
        .await
        .expect("report must not wait on itself");
        assert_eq!(hook.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
