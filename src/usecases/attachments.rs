//! Media collection: downloads a message's media into memory for upload.

use crate::domain::{Attachment, MediaReference, Message};
use crate::ports::TgGateway;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AttachmentCollector {
    tg: Arc<dyn TgGateway>,
    /// Mime types never uploaded.
    ignore: Vec<String>,
}

impl AttachmentCollector {
    pub fn new(tg: Arc<dyn TgGateway>, ignore: Vec<String>) -> Self {
        Self { tg, ignore }
    }

    /// Download the message's media, if any and not ignored. Download
    /// failures are logged and yield no attachment.
    pub async fn collect(&self, message: &Message) -> Vec<Attachment> {
        let Some(media_ref) = message.media.as_ref() else {
            return Vec::new();
        };

        let mime_type = mime_type_for(media_ref);
        if self.is_ignored(&mime_type) {
            debug!(
                chat_id = media_ref.chat_id,
                msg_id = media_ref.message_id,
                mime_type,
                "attachment ignored by mime type"
            );
            return Vec::new();
        }

        match self.tg.download_media(media_ref).await {
            Ok(data) => {
                debug!(
                    chat_id = media_ref.chat_id,
                    msg_id = media_ref.message_id,
                    bytes = data.len(),
                    "media downloaded"
                );
                vec![Attachment {
                    name: file_name_for(media_ref),
                    mime_type,
                    data,
                }]
            }
            Err(e) => {
                warn!(chat_id = media_ref.chat_id, msg_id = media_ref.message_id, error = %e, "media download failed");
                Vec::new()
            }
        }
    }

    fn is_ignored(&self, mime_type: &str) -> bool {
        self.ignore
            .iter()
            .any(|ignored| ignored.eq_ignore_ascii_case(mime_type))
    }
}

fn mime_type_for(media_ref: &MediaReference) -> String {
    media_ref
        .mime_type
        .clone()
        .unwrap_or_else(|| media_ref.media_type.default_mime().to_string())
}

fn file_name_for(media_ref: &MediaReference) -> String {
    match media_ref.file_name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => format!(
            "{}_{}.{}",
            media_ref.chat_id,
            media_ref.message_id,
            media_ref.media_type.extension()
        ),
    }
}
