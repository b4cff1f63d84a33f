//! Dedup/edit guard. Skips edit events whose visible text did not change.
//!
//! Telegram fires edits for pins, view counters and reactions; only a real
//! text change should be relayed again.

use crate::ports::FingerprintStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// SHA-256 of the raw text, hex encoded.
pub fn fingerprint(raw_text: &str) -> String {
    hex::encode(Sha256::digest(raw_text.as_bytes()))
}

pub struct EditGuard {
    store: Arc<dyn FingerprintStore>,
}

impl EditGuard {
    pub fn new(store: Arc<dyn FingerprintStore>) -> Self {
        Self { store }
    }

    /// Non-edits always proceed. Edits proceed unless the stored fingerprint
    /// equals the current one. Store failures fail open.
    pub async fn should_process(
        &self,
        is_edit: bool,
        chat_id: i64,
        message_id: i32,
        raw_text: &str,
    ) -> bool {
        if !is_edit {
            return true;
        }
        match self.store.get(chat_id, message_id).await {
            Ok(Some(stored)) => {
                let unchanged = stored == fingerprint(raw_text);
                if unchanged {
                    debug!(chat_id, msg_id = message_id, "edit without text change; skipping");
                }
                !unchanged
            }
            Ok(None) => true,
            Err(e) => {
                warn!(chat_id, msg_id = message_id, error = %e, "fingerprint lookup failed; processing edit");
                true
            }
        }
    }

    /// Upsert the fingerprint once per processed event. Failures are logged only.
    pub async fn commit(&self, chat_id: i64, message_id: i32, raw_text: &str) {
        if let Err(e) = self
            .store
            .put(chat_id, message_id, &fingerprint(raw_text))
            .await
        {
            warn!(chat_id, msg_id = message_id, error = %e, "failed to store fingerprint");
        }
    }
}
