//! Event source: pulls updates from grammers and hands them to the relay.
//!
//! Each event is handled on its own task so a slow delivery never stalls the
//! update stream. Ctrl-C stops intake and drains in-flight events.

use crate::adapters::telegram::mapper;
use crate::domain::InboundEvent;
use crate::ports::UpdateHandler;
use grammers_client::Update;
use grammers_client::client::UpdateStream;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

fn to_event(update: &Update) -> Option<InboundEvent> {
    match update {
        Update::NewMessage(message) => mapper::message_event(&message.raw, false),
        Update::MessageEdited(message) => mapper::message_event(&message.raw, true),
        Update::Raw(raw) => mapper::pinned_event(&raw.raw),
        _ => None,
    }
}

/// Run until Ctrl-C or the stream ends.
pub async fn run_update_loop(mut stream: UpdateStream, handler: Arc<dyn UpdateHandler>) {
    let mut inflight = JoinSet::new();
    info!("listening for updates");

    loop {
        let update = tokio::select! {
            update = stream.next() => update,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        };

        // Reap finished handlers so the set stays small.
        while let Some(done) = inflight.try_join_next() {
            if let Err(e) = done {
                error!(error = %e, "event handler panicked");
            }
        }

        let update = match update {
            Ok(update) => update,
            Err(e) => {
                error!(error = %e, "update stream failed");
                break;
            }
        };
        let Some(event) = to_event(&update) else {
            continue;
        };
        debug!(?event, "inbound event");
        let handler = Arc::clone(&handler);
        inflight.spawn(async move { handler.handle(event).await });
    }

    if !inflight.is_empty() {
        info!(pending = inflight.len(), "waiting for in-flight events");
    }
    while let Some(done) = inflight.join_next().await {
        if let Err(e) = done {
            warn!(error = %e, "event handler did not finish cleanly");
        }
    }
    stream.sync_update_state();
}
