//! Address book sync - uploads a full snapshot each tick

use crate::api::TransportClient;
use crate::crypto::{CryptoError, EncryptionService};
use crate::store::{ConfigStore, ConfigStoreExt};
use crate::sync::error::{SourceError, SyncError};
use crate::sync::models::{SyncReport, SyncServiceConfig};
use crate::sync::scheduler::SyncSource;
use crate::sync::source::{normalize_phone, protect, protect_opt, upload_body};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub const UPLOAD_PATH: &str = "/api/contacts";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization: Option<String>,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
}

impl ContactRecord {
    /// Encrypted fields plus blind indexes so the server can match a phone
    /// number or email without seeing it
    pub fn to_upload(&self, crypto: Option<&EncryptionService>) -> Result<Value, CryptoError> {
        let emails = self
            .emails
            .iter()
            .map(|e| protect(crypto, e))
            .collect::<Result<Vec<_>, _>>()?;
        let phone_numbers = self
            .phone_numbers
            .iter()
            .map(|p| protect(crypto, p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut upload = json!({
            "id": self.id,
            "firstName": protect_opt(crypto, self.first_name.as_deref())?,
            "lastName": protect_opt(crypto, self.last_name.as_deref())?,
            "organization": protect_opt(crypto, self.organization.as_deref())?,
            "emails": emails,
            "phoneNumbers": phone_numbers,
        });

        if let Some(service) = crypto {
            let email_indexes: Vec<String> = self
                .emails
                .iter()
                .map(|e| service.blind_index(&e.trim().to_lowercase()))
                .filter(|i| !i.is_empty())
                .collect();
            let phone_indexes: Vec<String> = self
                .phone_numbers
                .iter()
                .map(|p| service.blind_index(&normalize_phone(p)))
                .filter(|i| !i.is_empty())
                .collect();
            upload["emailIndexes"] = json!(email_indexes);
            upload["phoneIndexes"] = json!(phone_indexes);
        }

        Ok(upload)
    }
}

/// Reads the whole address book
#[async_trait]
pub trait ContactSource: Send + Sync + 'static {
    async fn fetch_contacts(&self) -> Result<Vec<ContactRecord>, SourceError>;
}

pub struct ContactsService<C> {
    source: Arc<C>,
    transport: Arc<dyn TransportClient>,
    store: Arc<dyn ConfigStore>,
}

impl<C: ContactSource> ContactsService<C> {
    pub fn new(source: Arc<C>, transport: Arc<dyn TransportClient>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            source,
            transport,
            store,
        }
    }
}

#[async_trait]
impl<C: ContactSource> SyncSource for ContactsService<C> {
    fn name(&self) -> &str {
        "contacts"
    }

    fn default_config(&self) -> SyncServiceConfig {
        SyncServiceConfig::new(false, 60)
    }

    async fn on_sync(&self) -> Result<SyncReport, SyncError> {
        let contacts = self.source.fetch_contacts().await?;
        tokio::task::yield_now().await;

        if contacts.is_empty() {
            log::info!("contacts: no contacts to sync");
            return Ok(SyncReport::items(0));
        }

        let crypto = self.store.encryption_service()?;
        let items = contacts
            .iter()
            .map(|c| c.to_upload(crypto.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let body = upload_body("contacts", items, crypto.is_some());
        self.transport.upload_json(UPLOAD_PATH, &body).await?;

        log::info!("contacts: uploaded {} contacts", contacts.len());
        Ok(SyncReport::items(contacts.len() as u64))
    }
}
