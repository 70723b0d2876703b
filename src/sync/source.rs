//! Local data sources and their upload schema
//!
//! A [`LocalDataSource`] pages through platform data (a chat database, the
//! address book) in `(timestamp, id)` order. The same cursor contract serves
//! the recurring export (starting from the watermark) and the backfill
//! (starting from `now - window`).

use super::error::SourceError;
use super::models::{Cursor, Page};
use crate::crypto::{CryptoError, EncryptionService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Paginated read access to local records
#[async_trait]
pub trait LocalDataSource: Send + Sync + 'static {
    type Item: SyncRecord;

    /// Acquire any handle the source needs (e.g. open a database file)
    async fn open(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn close(&self) {}

    /// Best-effort number of items since `since`; `None` if uncountable
    async fn count_since(&self, _since: DateTime<Utc>) -> Result<Option<u64>, SourceError> {
        Ok(None)
    }

    /// Up to `limit` items strictly past `cursor`, oldest first.
    ///
    /// `next_cursor` must be `None` once the source is exhausted; otherwise it
    /// points at the last returned item so consecutive pages never overlap.
    async fn fetch_since(&self, cursor: &Cursor, limit: usize)
        -> Result<Page<Self::Item>, SourceError>;
}

/// A record that can be exported to the server
pub trait SyncRecord: Send + Sync + 'static {
    /// Endpoint receiving batches of this record
    const UPLOAD_PATH: &'static str;

    /// Key of the record array inside the upload body
    const COLLECTION: &'static str;

    /// Position of this record in its source
    fn cursor(&self) -> Cursor;

    /// Conversation the record belongs to, for ignore-list filtering
    fn chat_id(&self) -> Option<&str> {
        None
    }

    /// Map to the upload schema, encrypting sensitive fields when `crypto` is set
    fn to_upload(&self, crypto: Option<&EncryptionService>) -> Result<Value, CryptoError>;
}

/// Upload body: `{ "<collection>": [...], "encrypted": bool }`
pub fn upload_body(collection: &str, items: Vec<Value>, encrypted: bool) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(collection.to_string(), Value::Array(items));
    body.insert("encrypted".to_string(), json!(encrypted));
    Value::Object(body)
}

/// Map a batch to its upload body, dropping records from ignored chats.
///
/// Returns `None` when every record was filtered out.
pub fn build_batch<T: SyncRecord>(
    items: &[T],
    ignored_chat_ids: &[String],
    crypto: Option<&EncryptionService>,
) -> Result<Option<(Value, usize)>, CryptoError> {
    let mut mapped = Vec::with_capacity(items.len());
    for item in items {
        if item
            .chat_id()
            .map(|id| ignored_chat_ids.iter().any(|ignored| ignored == id))
            .unwrap_or(false)
        {
            continue;
        }
        mapped.push(item.to_upload(crypto)?);
    }

    if mapped.is_empty() {
        return Ok(None);
    }
    let count = mapped.len();
    Ok(Some((upload_body(T::COLLECTION, mapped, crypto.is_some()), count)))
}

/// Encrypt `value` when a service is configured, pass it through otherwise
pub fn protect(crypto: Option<&EncryptionService>, value: &str) -> Result<String, CryptoError> {
    match crypto {
        Some(service) => service.encrypt_text(value),
        None => Ok(value.to_string()),
    }
}

/// Optional-field variant of [`protect`]
pub fn protect_opt(
    crypto: Option<&EncryptionService>,
    value: Option<&str>,
) -> Result<Option<String>, CryptoError> {
    value.map(|v| protect(crypto, v)).transpose()
}

/// Digits only, so `+1 (555) 010-2030` and `15550102030` index the same
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}
