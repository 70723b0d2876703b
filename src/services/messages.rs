//! Message export service
//!
//! Recurring export of chat messages since the stored watermark (or the last
//! 24 hours on first run), uploaded in batches of 50. The watermark moves to
//! the newest exported message only once every batch has been confirmed.

use crate::api::TransportClient;
use crate::crypto::{encode_base64, CryptoError, EncryptionService};
use crate::store::{ConfigStore, ConfigStoreExt};
use crate::sync::backfill::DEFAULT_BATCH_SIZE;
use crate::sync::error::SyncError;
use crate::sync::models::{Cursor, SyncReport, SyncServiceConfig};
use crate::sync::scheduler::SyncSource;
use crate::sync::source::{
    build_batch, normalize_phone, protect, protect_opt, LocalDataSource, SyncRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;
pub const INCLUDE_ATTACHMENTS_OPTION: &str = "includeAttachments";

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing)]
    pub data: Option<Vec<u8>>,
}

/// One chat message read from a local database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: i64,
    pub chat_id: String,
    pub chat_name: Option<String>,
    pub text: String,
    pub subject: Option<String>,
    pub sender: String,
    pub is_from_me: bool,
    pub date: DateTime<Utc>,
    pub is_group: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Attachment {
    fn to_upload(&self, crypto: Option<&EncryptionService>) -> Result<Value, CryptoError> {
        let data = match (&self.data, crypto) {
            (Some(data), Some(service)) => Some(service.encrypt_bytes_to_string(data)?),
            (Some(data), None) => Some(encode_base64(data)),
            (None, _) => None,
        };
        Ok(json!({
            "id": self.id,
            "filename": self.filename,
            "mimeType": self.mime_type,
            "dataBase64": data,
        }))
    }
}

impl SyncRecord for MessageRecord {
    const UPLOAD_PATH: &'static str = "/api/messages";
    const COLLECTION: &'static str = "messages";

    fn cursor(&self) -> Cursor {
        Cursor::after(self.date, self.id)
    }

    fn chat_id(&self) -> Option<&str> {
        Some(&self.chat_id)
    }

    fn to_upload(&self, crypto: Option<&EncryptionService>) -> Result<Value, CryptoError> {
        let attachments = self
            .attachments
            .iter()
            .map(|a| a.to_upload(crypto))
            .collect::<Result<Vec<_>, _>>()?;

        let mut upload = json!({
            "id": self.id,
            "chatId": self.chat_id,
            "chatName": self.chat_name,
            "text": protect(crypto, &self.text)?,
            "subject": protect_opt(crypto, self.subject.as_deref())?,
            "sender": self.sender,
            "isFromMe": self.is_from_me,
            "date": self.date,
            "isGroup": self.is_group,
            "attachments": attachments,
        });

        if let Some(service) = crypto {
            let digits = normalize_phone(&self.sender);
            if !digits.is_empty() {
                upload["senderPhoneIndex"] = json!(service.blind_index(&digits));
            }
        }
        Ok(upload)
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct MessagesService<S> {
    name: String,
    source: Arc<S>,
    transport: Arc<dyn TransportClient>,
    store: Arc<dyn ConfigStore>,
    batch_size: usize,
}

impl<S> MessagesService<S>
where
    S: LocalDataSource<Item = MessageRecord>,
{
    pub fn new(
        name: impl Into<String>,
        source: Arc<S>,
        transport: Arc<dyn TransportClient>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            transport,
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Where the next export starts
    fn start_cursor(&self) -> Result<Cursor, SyncError> {
        Ok(match self.store.watermark(&self.name)? {
            Some(watermark) => watermark,
            None => Cursor::since(Utc::now() - Duration::hours(DEFAULT_LOOKBACK_HOURS)),
        })
    }

    async fn export(&self) -> Result<SyncReport, SyncError> {
        let config = self.store.service_config(&self.name, self.default_config())?;
        let include_attachments = config.option_bool(INCLUDE_ATTACHMENTS_OPTION, false);
        let crypto = self.store.encryption_service()?;
        let ignored = self.store.ignored_chat_ids(&self.name)?;

        let mut cursor = self.start_cursor()?;
        let mut newest: Option<Cursor> = None;
        let mut uploaded = 0u64;

        loop {
            let page = self.source.fetch_since(&cursor, self.batch_size).await?;
            tokio::task::yield_now().await;

            if let Some(last) = page.items.last() {
                newest = Some(last.cursor());
            }

            let items: Vec<MessageRecord> = if include_attachments {
                page.items
            } else {
                page.items
                    .into_iter()
                    .map(|mut m| {
                        m.attachments.clear();
                        m
                    })
                    .collect()
            };

            if let Some((body, count)) = build_batch(&items, &ignored, crypto.as_ref())? {
                self.transport
                    .upload_json(MessageRecord::UPLOAD_PATH, &body)
                    .await?;
                uploaded += count as u64;
                tokio::task::yield_now().await;
            }

            match page.next_cursor {
                Some(next) if cursor.is_before(&next) => cursor = next,
                _ => break,
            }
        }

        match newest {
            Some(newest) => self.store.set_watermark(&self.name, &newest)?,
            None => log::info!("{}: no new messages to export", self.name),
        }
        Ok(SyncReport::items(uploaded))
    }
}

#[async_trait]
impl<S> SyncSource for MessagesService<S>
where
    S: LocalDataSource<Item = MessageRecord>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn default_config(&self) -> SyncServiceConfig {
        let mut config = SyncServiceConfig::new(false, 5);
        config
            .source_options
            .insert(INCLUDE_ATTACHMENTS_OPTION.to_string(), json!(false));
        config
    }

    async fn on_start(&self) -> Result<(), SyncError> {
        Ok(self.source.open().await?)
    }

    async fn on_stop(&self) {
        self.source.close().await;
    }

    async fn on_sync(&self) -> Result<SyncReport, SyncError> {
        self.export().await
    }
}

// ============================================================================
// Tests
// ============================================================================
