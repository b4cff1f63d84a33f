//! Implements MirrorPort with one JSON file per chat.
//!
//! Keeps the newest `MAX_PER_CHAT` messages of each chat in memory and on
//! disk (`<dir>/<chat_id>.json`). Changes are published to subscribers.

use crate::domain::DomainError;
use crate::ports::{MirrorPort, MirroredMessage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

pub const MAX_PER_CHAT: usize = 250;

const EVENT_BUFFER: usize = 64;

/// Change notification for mirror subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Added(MirroredMessage),
    Cleared,
}

/// Live feed of store events. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<StoreEvent>,
}

impl Subscription {
    /// Next event, or `None` once the store is gone. Events missed by a slow
    /// subscriber are skipped.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "mirror subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub struct JsonMirrorStore {
    dir: PathBuf,
    chats: RwLock<HashMap<i64, Vec<MirroredMessage>>>,
    events: broadcast::Sender<StoreEvent>,
}

impl JsonMirrorStore {
    /// Open the mirror directory, loading whatever chat files it holds.
    /// Unreadable files are skipped.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, DomainError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DomainError::Repo(format!("create mirror dir: {}", e)))?;

        let mut chats = HashMap::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| DomainError::Repo(format!("read mirror dir: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DomainError::Repo(e.to_string()))?
        {
            let path = entry.path();
            let Some(chat_id) = chat_id_from_path(&path) else {
                continue;
            };
            match load_chat(&path).await {
                Ok(messages) => {
                    chats.insert(chat_id, messages);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable mirror file"),
            }
        }

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            dir,
            chats: RwLock::new(chats),
            events,
        })
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.events.subscribe(),
        }
    }

    fn chat_path(&self, chat_id: i64) -> PathBuf {
        self.dir.join(format!("{}.json", chat_id))
    }

    /// Write-replace: temp file, fsync, rename.
    async fn save_chat(&self, chat_id: i64, messages: &[MirroredMessage]) -> Result<(), DomainError> {
        let json = serde_json::to_string_pretty(messages)
            .map_err(|e| DomainError::Repo(e.to_string()))?;
        let path = self.chat_path(chat_id);
        let temp_path = path.with_extension("json.tmp");

        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| DomainError::Repo(format!("create temp file: {}", e)))?;
        f.write_all(json.as_bytes())
            .await
            .map_err(|e| DomainError::Repo(format!("write temp file: {}", e)))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::Repo(format!("sync temp file: {}", e)))?;
        drop(f);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| DomainError::Repo(format!("atomic rename failed: {}", e)))
    }
}

#[async_trait::async_trait]
impl MirrorPort for JsonMirrorStore {
    async fn record(&self, message: MirroredMessage) -> Result<(), DomainError> {
        let chat_id = message.chat_id;
        // Held across the write so two records for one chat can't reorder on disk.
        let mut chats = self.chats.write().await;
        let messages = chats.entry(chat_id).or_default();
        messages.push(message.clone());
        if messages.len() > MAX_PER_CHAT {
            let excess = messages.len() - MAX_PER_CHAT;
            messages.drain(..excess);
        }
        self.save_chat(chat_id, messages).await?;
        drop(chats);

        let _ = self.events.send(StoreEvent::Added(message));
        Ok(())
    }
}

/// Debug-log store changes until the store is dropped.
pub async fn log_events(mut sub: Subscription) {
    while let Some(event) = sub.recv().await {
        match event {
            StoreEvent::Added(m) => {
                debug!(chat_id = m.chat_id, msg_id = m.message_id, origin = %m.origin, "mirrored message")
            }
            StoreEvent::Cleared => debug!("mirror cleared"),
        }
    }
    debug!("mirror event feed closed");
}

#[cfg(test)]
impl JsonMirrorStore {
    pub(crate) fn subscribers(&self) -> usize {
        self.events.receiver_count()
    }

    pub(crate) async fn messages(&self, chat_id: i64) -> Vec<MirroredMessage> {
        self.chats
            .read()
            .await
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop everything, in memory and on disk.
    pub(crate) async fn clear(&self) -> Result<(), DomainError> {
        let mut chats = self.chats.write().await;
        for chat_id in chats.keys() {
            let path = self.chat_path(*chat_id);
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(DomainError::Repo(format!("remove {}: {}", path.display(), e)));
                }
            }
        }
        chats.clear();
        let _ = self.events.send(StoreEvent::Cleared);
        Ok(())
    }
}

fn chat_id_from_path(path: &Path) -> Option<i64> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

async fn load_chat(path: &Path) -> Result<Vec<MirroredMessage>, DomainError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|e| DomainError::Repo(e.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| DomainError::Repo(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chat_id: i64, message_id: i32) -> MirroredMessage {
        MirroredMessage {
            chat_id,
            message_id,
            author: Some("Alice".into()),
            content: format!("message {}", message_id),
            reply: None,
            time: 1_700_000_000_000 + message_id as i64,
            origin: "Lobby".into(),
        }
    }

    #[tokio::test]
    async fn records_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonMirrorStore::open(dir.path()).await.unwrap();
            store.record(entry(-100, 1)).await.unwrap();
            store.record(entry(-100, 2)).await.unwrap();
            store.record(entry(-200, 1)).await.unwrap();
        }
        assert!(dir.path().join("-100.json").exists());
        assert!(!dir.path().join("-100.json.tmp").exists());

        let store = JsonMirrorStore::open(dir.path()).await.unwrap();
        let ids: Vec<i32> = store
            .messages(-100)
            .await
            .iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.messages(-200).await.len(), 1);
    }

    #[tokio::test]
    async fn keeps_only_newest_per_chat() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMirrorStore::open(dir.path()).await.unwrap();
        for id in 0..(MAX_PER_CHAT as i32 + 10) {
            store.record(entry(-100, id)).await.unwrap();
        }
        let messages = store.messages(-100).await;
        assert_eq!(messages.len(), MAX_PER_CHAT);
        assert_eq!(messages[0].message_id, 10);
    }

    #[tokio::test]
    async fn skips_corrupt_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("-100.json"), "not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let store = JsonMirrorStore::open(dir.path()).await.unwrap();
        assert!(store.messages(-100).await.is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_added_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMirrorStore::open(dir.path()).await.unwrap();
        let mut sub = store.subscribe();

        store.record(entry(-100, 1)).await.unwrap();
        store.clear().await.unwrap();

        assert_eq!(sub.recv().await, Some(StoreEvent::Added(entry(-100, 1))));
        assert_eq!(sub.recv().await, Some(StoreEvent::Cleared));
        assert!(store.messages(-100).await.is_empty());
        assert!(!dir.path().join("-100.json").exists());
    }

    #[tokio::test]
    async fn event_log_ends_with_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMirrorStore::open(dir.path()).await.unwrap();
        let feed = tokio::spawn(log_events(store.subscribe()));
        assert_eq!(store.subscribers(), 1);

        store.record(entry(-100, 1)).await.unwrap();
        drop(store);
        tokio::time::timeout(std::time::Duration::from_secs(5), feed)
            .await
            .expect("event log still running")
            .unwrap();
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMirrorStore::open(dir.path()).await.unwrap();
        let sub = store.subscribe();
        assert_eq!(store.subscribers(), 1);
        drop(sub);
        assert_eq!(store.subscribers(), 0);
    }
}
