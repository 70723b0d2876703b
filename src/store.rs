//! Settings store
//!
//! `ConfigStore` is the durable key/value collaborator shared by the scheduler,
//! the backfill engine and the transport client. Values are JSON so that a
//! store can be backed by SQLite ([`Database`]) or anything else that keeps
//! strings across restarts.

use crate::crypto::{CryptoError, EncryptionService};
use crate::db::{Database, DbError};
use crate::sync::models::{Cursor, SyncServiceConfig};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub const SERVER_URL_KEY: &str = "serverUrl";
pub const DEVICE_ID_KEY: &str = "deviceId";
pub const DEVICE_SECRET_KEY: &str = "deviceSecret";
pub const ENCRYPTION_KEY_KEY: &str = "encryptionKey";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable key/value settings
pub trait ConfigStore: Send + Sync {
    fn get_value(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Prepend to a bounded JSON array (newest first)
    fn prepend_bounded(&self, key: &str, entry: Value, cap: usize) -> Result<(), StoreError> {
        let mut entries = match self.get_value(key)? {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };
        entries.insert(0, entry);
        entries.truncate(cap);
        self.set_value(key, Value::Array(entries))
    }
}

impl ConfigStore for Database {
    fn get_value(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get_setting(key)?)
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError> {
        Ok(self.set_setting(key, &value)?)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        Ok(self.delete_setting(key)?)
    }

    fn prepend_bounded(&self, key: &str, entry: Value, cap: usize) -> Result<(), StoreError> {
        Ok(Database::prepend_bounded(self, key, entry, cap)?)
    }
}

fn config_key(source: &str) -> String {
    format!("{}.config", source)
}

fn watermark_key(source: &str) -> String {
    format!("{}.watermark", source)
}

fn next_sync_key(source: &str) -> String {
    format!("{}.nextSyncAfter", source)
}

fn ignored_chats_key(source: &str) -> String {
    format!("{}.ignoredChatIds", source)
}

/// Typed accessors over any [`ConfigStore`]
pub trait ConfigStoreExt: ConfigStore {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError>;

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError>;

    /// Stored config for `source`, or `default` when never saved.
    ///
    /// `next_sync_after` lives under its own key so the timer can update it
    /// without rewriting the user's settings.
    fn service_config(
        &self,
        source: &str,
        default: SyncServiceConfig,
    ) -> Result<SyncServiceConfig, StoreError> {
        let mut config = self.get(&config_key(source))?.unwrap_or(default);
        config.next_sync_after = self.next_sync_after(source)?;
        Ok(config)
    }

    /// Persist the user settings of `source`; `next_sync_after` is ignored
    fn set_service_config(&self, source: &str, config: &SyncServiceConfig) -> Result<(), StoreError> {
        let settings = SyncServiceConfig {
            next_sync_after: None,
            ..config.clone()
        };
        self.set(&config_key(source), &settings)
    }

    fn next_sync_after(&self, source: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.get(&next_sync_key(source))
    }

    fn set_next_sync_after(
        &self,
        source: &str,
        next: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        match next {
            Some(at) => self.set(&next_sync_key(source), &at),
            None => self.remove(&next_sync_key(source)),
        }
    }

    /// Last successfully exported position for `source`
    fn watermark(&self, source: &str) -> Result<Option<Cursor>, StoreError> {
        self.get(&watermark_key(source))
    }

    fn set_watermark(&self, source: &str, cursor: &Cursor) -> Result<(), StoreError> {
        self.set(&watermark_key(source), cursor)
    }

    fn ignored_chat_ids(&self, source: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.get(&ignored_chats_key(source))?.unwrap_or_default())
    }

    fn set_ignored_chat_ids(&self, source: &str, chat_ids: &[String]) -> Result<(), StoreError> {
        self.set(&ignored_chats_key(source), chat_ids)
    }

    fn server_url(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .get::<String>(SERVER_URL_KEY)?
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty()))
    }

    fn device_secret(&self) -> Result<Option<String>, StoreError> {
        Ok(self.get::<String>(DEVICE_SECRET_KEY)?.filter(|s| !s.is_empty()))
    }

    /// Device identifier, generated and persisted on first use
    fn device_id(&self) -> Result<String, StoreError> {
        if let Some(id) = self.get::<String>(DEVICE_ID_KEY)?.filter(|id| !id.is_empty()) {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.set(DEVICE_ID_KEY, &id)?;
        Ok(id)
    }

    fn encryption_key(&self) -> Result<Option<String>, StoreError> {
        Ok(self.get::<String>(ENCRYPTION_KEY_KEY)?.filter(|k| !k.is_empty()))
    }

    /// Build an [`EncryptionService`] when a passphrase is configured
    fn encryption_service(&self) -> Result<Option<EncryptionService>, SettingsError> {
        match self.encryption_key()? {
            Some(passphrase) => Ok(Some(EncryptionService::new(&passphrase)?)),
            None => Ok(None),
        }
    }
}

impl<S: ConfigStore + ?Sized> ConfigStoreExt for S {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_value(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.set_value(key, serde_json::to_value(value)?)
    }
}

/// Failure while turning stored settings into a usable encryption context
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

// ============================================================================
// Tests
// ============================================================================
