//! In-memory FingerprintStore. Used when no database is wanted and in tests.

use crate::domain::DomainError;
use crate::ports::FingerprintStore;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    entries: RwLock<HashMap<(i64, i32), String>>,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    async fn get(&self, chat_id: i64, message_id: i32) -> Result<Option<String>, DomainError> {
        Ok(self.entries.read().await.get(&(chat_id, message_id)).cloned())
    }

    async fn put(
        &self,
        chat_id: i64,
        message_id: i32,
        fingerprint: &str,
    ) -> Result<(), DomainError> {
        self.entries
            .write()
            .await
            .insert((chat_id, message_id), fingerprint.to_string());
        Ok(())
    }
}
