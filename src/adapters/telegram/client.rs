//! Implements TgGateway using grammers Client.
//!
//! Handles FloodWait by sleeping and retrying. Messages are fetched with raw
//! `GetMessages` so the users/chats of the response can resolve authors.

use crate::adapters::telegram::mapper;
use crate::domain::{ChatInfo, ChatKind, DomainError, MediaReference, Message};
use crate::ports::TgGateway;
use async_trait::async_trait;
use grammers_client::Client;
use grammers_client::InvocationError;
use grammers_client::tl;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const FLOOD_WAIT_ATTEMPTS: usize = 3;

/// Resolved dialog: input peer for raw calls plus its display name.
#[derive(Clone)]
struct CachedPeer {
    input: tl::enums::InputPeer,
    name: String,
}

/// Telegram gateway adapter. Clone of the client shared with the auth adapter.
pub struct GrammersTgGateway {
    client: Client,
    /// Downloads land here before being read into memory.
    scratch_dir: PathBuf,
    /// Cache by chat_id so we don't call iter_dialogs for every event (avoids FLOOD_WAIT).
    peer_cache: Mutex<HashMap<i64, CachedPeer>>,
    chat_cache: Mutex<HashMap<i64, ChatInfo>>,
}

impl GrammersTgGateway {
    pub fn new(client: Client, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            scratch_dir: scratch_dir.into(),
            peer_cache: Mutex::new(HashMap::new()),
            chat_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Walk the dialog list once, filling the peer cache.
    async fn refresh_dialogs(&self) -> Result<Vec<(i64, CachedPeer)>, DomainError> {
        let mut dialogs = self.client.iter_dialogs();
        let mut found = Vec::new();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| DomainError::TgGateway(e.to_string()))?
        {
            let peer = dialog.peer();
            let id = peer.id().bot_api_dialog_id();
            let Some(peer_ref) = peer.to_ref().await else {
                debug!(chat_id = id, "dialog peer not in session cache");
                continue;
            };
            let name = peer
                .name()
                .map(String::from)
                .unwrap_or_else(|| id.to_string());
            found.push((
                id,
                CachedPeer {
                    input: peer_ref.into(),
                    name,
                },
            ));
        }
        let mut cache = self.peer_cache.lock().await;
        for (id, peer) in &found {
            cache.insert(*id, peer.clone());
        }
        Ok(found)
    }

    async fn resolve_peer(&self, chat_id: i64) -> Result<CachedPeer, DomainError> {
        if let Some(peer) = self.peer_cache.lock().await.get(&chat_id) {
            return Ok(peer.clone());
        }
        self.refresh_dialogs()
            .await?
            .into_iter()
            .find(|(id, _)| *id == chat_id)
            .map(|(_, peer)| peer)
            .ok_or_else(|| DomainError::TgGateway(format!("peer {} not found in dialogs", chat_id)))
    }

    /// Invoke a raw request, sleeping through FloodWait.
    async fn invoke<R>(&self, request: &R) -> Result<R::Return, DomainError>
    where
        R: tl::RemoteCall,
    {
        for attempt in 0..FLOOD_WAIT_ATTEMPTS {
            match self.client.invoke(request).await {
                Ok(response) => return Ok(response),
                Err(InvocationError::Rpc(rpc)) if rpc.code == 420 => {
                    let wait_secs = rpc.value.unwrap_or(60) as u64;
                    warn!(attempt, wait_secs, "FloodWait, sleeping");
                    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                }
                Err(e) => return Err(DomainError::TgGateway(e.to_string())),
            }
        }
        Err(DomainError::TgGateway("FloodWait max retries".into()))
    }

    async fn chat_from_input(&self, chat_id: i64, peer: &CachedPeer) -> Result<ChatInfo, DomainError> {
        use tl::enums::messages::Chats;

        let response = match &peer.input {
            tl::enums::InputPeer::Channel(c) => {
                self.invoke(&tl::functions::channels::GetChannels {
                    id: vec![tl::enums::InputChannel::Channel(tl::types::InputChannel {
                        channel_id: c.channel_id,
                        access_hash: c.access_hash,
                    })],
                })
                .await?
            }
            tl::enums::InputPeer::Chat(c) => {
                self.invoke(&tl::functions::messages::GetChats {
                    id: vec![c.chat_id],
                })
                .await?
            }
            _ => {
                return Ok(ChatInfo {
                    id: chat_id,
                    kind: ChatKind::DirectMessage {
                        name: peer.name.clone(),
                    },
                });
            }
        };
        let chats = match response {
            Chats::Chats(c) => c.chats,
            Chats::Slice(c) => c.chats,
        };
        chats
            .iter()
            .filter_map(mapper::chat_info_from_tl)
            .find(|info| info.id == chat_id)
            .ok_or_else(|| DomainError::TgGateway(format!("chat {} not returned", chat_id)))
    }
}

#[async_trait]
impl TgGateway for GrammersTgGateway {
    async fn get_dialogs(&self) -> Result<Vec<ChatInfo>, DomainError> {
        let dialogs = self.refresh_dialogs().await?;
        let mut chats = Vec::with_capacity(dialogs.len());
        for (id, peer) in dialogs {
            match self.chat_from_input(id, &peer).await {
                Ok(info) => {
                    self.chat_cache.lock().await.insert(id, info.clone());
                    chats.push(info);
                }
                Err(e) => warn!(chat_id = id, error = %e, "skipping dialog"),
            }
        }
        Ok(chats)
    }

    async fn get_chat(&self, chat_id: i64) -> Result<ChatInfo, DomainError> {
        if let Some(info) = self.chat_cache.lock().await.get(&chat_id) {
            return Ok(info.clone());
        }
        let peer = self.resolve_peer(chat_id).await?;
        let info = self.chat_from_input(chat_id, &peer).await?;
        self.chat_cache.lock().await.insert(chat_id, info.clone());
        Ok(info)
    }

    async fn get_messages(&self, chat_id: i64, ids: &[i32]) -> Result<Vec<Message>, DomainError> {
        use tl::enums::messages::Messages;

        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let peer = self.resolve_peer(chat_id).await?;
        let id: Vec<tl::enums::InputMessage> = ids
            .iter()
            .map(|&id| tl::enums::InputMessage::Id(tl::types::InputMessageId { id }))
            .collect();

        let raw = match &peer.input {
            tl::enums::InputPeer::Channel(c) => {
                self.invoke(&tl::functions::channels::GetMessages {
                    channel: tl::enums::InputChannel::Channel(tl::types::InputChannel {
                        channel_id: c.channel_id,
                        access_hash: c.access_hash,
                    }),
                    id,
                })
                .await?
            }
            _ => self.invoke(&tl::functions::messages::GetMessages { id }).await?,
        };

        let (messages, users, chats) = match raw {
            Messages::Messages(m) => (m.messages, m.users, m.chats),
            Messages::Slice(m) => (m.messages, m.users, m.chats),
            Messages::ChannelMessages(m) => (m.messages, m.users, m.chats),
            Messages::NotModified(_) => return Ok(Vec::new()),
        };
        let authors = mapper::author_index(&users, &chats);
        Ok(messages
            .iter()
            .filter_map(|msg| mapper::message_to_domain(msg, chat_id, &authors))
            .collect())
    }

    async fn download_media(&self, media_ref: &MediaReference) -> Result<Vec<u8>, DomainError> {
        let mut source = None;
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| DomainError::TgGateway(e.to_string()))?
        {
            let p = dialog.peer();
            if p.id().bot_api_dialog_id() == media_ref.chat_id {
                source = Some(p.clone());
                break;
            }
        }
        let source = source
            .ok_or_else(|| DomainError::Media(format!("peer {} not found", media_ref.chat_id)))?
            .to_ref()
            .await
            .ok_or_else(|| DomainError::Media("peer not in session cache".into()))?;
        let messages = self
            .client
            .get_messages_by_id(source, &[media_ref.message_id])
            .await
            .map_err(|e| DomainError::Media(e.to_string()))?;

        let msg = messages
            .into_iter()
            .next()
            .and_then(|o| o)
            .ok_or_else(|| DomainError::Media("message not found".into()))?;

        let media = msg
            .media()
            .ok_or_else(|| DomainError::Media("message has no media".into()))?;

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| DomainError::Media(format!("create scratch dir: {}", e)))?;
        let path = self.scratch_dir.join(format!(
            "{}_{}.{}",
            media_ref.chat_id,
            media_ref.message_id,
            media_ref.media_type.extension()
        ));
        self.client
            .download_media(&media, &path)
            .await
            .map_err(|e| DomainError::Media(e.to_string()))?;

        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| DomainError::Media(format!("read {}: {}", path.display(), e)));
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %e, "scratch file not removed");
        }
        let data = data?;

        debug!(
            chat_id = media_ref.chat_id,
            msg_id = media_ref.message_id,
            bytes = data.len(),
            "media downloaded"
        );
        Ok(data)
    }

    async fn forward_message(
        &self,
        chat_id: i64,
        message_id: i32,
        destination: &str,
    ) -> Result<(), DomainError> {
        let destination = destination.trim().trim_start_matches('@');
        let destination_id = destination.parse::<i64>().ok();

        let mut source = None;
        let mut target = None;
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| DomainError::TgGateway(e.to_string()))?
        {
            let p = dialog.peer();
            let id = p.id().bot_api_dialog_id();
            if id == chat_id {
                source = Some(p.clone());
            }
            if destination_id == Some(id) {
                target = Some(p.clone());
            }
            if source.is_some() && (target.is_some() || destination_id.is_none()) {
                break;
            }
        }
        if destination_id.is_none() {
            target = self
                .client
                .resolve_username(destination)
                .await
                .map_err(|e| DomainError::TgGateway(e.to_string()))?;
        }

        let source = source
            .ok_or_else(|| DomainError::TgGateway(format!("peer {} not found", chat_id)))?
            .to_ref()
            .await
            .ok_or_else(|| DomainError::TgGateway("peer not in session cache".into()))?;
        let target = target
            .ok_or_else(|| DomainError::TgGateway(format!("destination {} not found", destination)))?
            .to_ref()
            .await
            .ok_or_else(|| DomainError::TgGateway("peer not in session cache".into()))?;
        self.client
            .forward_messages(target, &[message_id], source)
            .await
            .map_err(|e| DomainError::TgGateway(format!("forward: {}", e)))?;
        debug!(chat_id, msg_id = message_id, destination, "message forwarded");
        Ok(())
    }
}
