//! Sync History Module - bounded rolling logs
//!
//! Records one entry per sync tick and one per API request so the settings
//! UI can show what happened. Both logs are newest-first and capped; the
//! oldest entries are evicted once the cap is reached.

use super::models::{SyncLogEntry, SyncOutcome};
use crate::store::{ConfigStore, ConfigStoreExt, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MAX_LOGS: usize = 100;

const SYNC_LOGS_KEY: &str = "syncLogs";
const REQUEST_LOGS_KEY: &str = "requestLogs";

// ============================================================================
// Types & Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Success,
    Error,
}

/// One HTTP call made by the transport client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequestLog {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Log id of the form `<unix-ms>-<7 random chars>`
pub fn new_log_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &random[..7])
}

// ============================================================================
// History Manager
// ============================================================================

/// Manages the sync and request logs in a [`ConfigStore`]
#[derive(Clone)]
pub struct SyncHistory {
    store: Arc<dyn ConfigStore>,
    cap: usize,
}

impl SyncHistory {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store, cap: MAX_LOGS }
    }

    pub fn with_cap(store: Arc<dyn ConfigStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    /// Record the outcome of one tick, returning the new log id
    pub fn record_sync(
        &self,
        source: &str,
        outcome: SyncOutcome,
        item_count: u64,
        duration_ms: u64,
        error: Option<String>,
    ) -> Result<String, StoreError> {
        let entry = SyncLogEntry {
            id: new_log_id(),
            source: source.to_string(),
            timestamp: Utc::now(),
            outcome,
            item_count,
            duration_ms,
            error,
        };
        let id = entry.id.clone();
        self.store
            .prepend_bounded(SYNC_LOGS_KEY, serde_json::to_value(&entry)?, self.cap)?;
        Ok(id)
    }

    /// Sync log, newest first, optionally filtered by source
    pub fn sync_logs(&self, source: Option<&str>) -> Result<Vec<SyncLogEntry>, StoreError> {
        let logs: Vec<SyncLogEntry> = self.store.get(SYNC_LOGS_KEY)?.unwrap_or_default();
        Ok(match source {
            Some(source) => logs.into_iter().filter(|log| log.source == source).collect(),
            None => logs,
        })
    }

    pub fn clear_sync_logs(&self) -> Result<(), StoreError> {
        self.store.remove(SYNC_LOGS_KEY)
    }

    pub fn record_request(&self, log: &ApiRequestLog) -> Result<(), StoreError> {
        self.store
            .prepend_bounded(REQUEST_LOGS_KEY, serde_json::to_value(log)?, self.cap)
    }

    pub fn request_logs(&self) -> Result<Vec<ApiRequestLog>, StoreError> {
        Ok(self.store.get(REQUEST_LOGS_KEY)?.unwrap_or_default())
    }

    pub fn clear_request_logs(&self) -> Result<(), StoreError> {
        self.store.remove(REQUEST_LOGS_KEY)
    }
}

// ============================================================================
// Tests
// ============================================================================
