//! Sync Data Models
//!
//! Shared structures for the recurring scheduler and the backfill engine:
//! - SyncServiceConfig: persisted per-source schedule settings
//! - SyncRunStatus / ServiceStatus: observable scheduler state
//! - SyncLogEntry: one row of the bounded rolling sync log
//! - Cursor / Page: resumable pagination over local data
//! - BackfillProgress: immutable snapshot of a bulk import

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 1440;

// ============================================================================
// Service Configuration
// ============================================================================

/// Per-source schedule settings, persisted and loaded at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncServiceConfig {
    pub enabled: bool,

    pub interval_minutes: u32,

    /// When the armed timer is due, if any
    #[serde(default)]
    pub next_sync_after: Option<DateTime<Utc>>,

    /// Source-specific options (e.g. include attachments)
    #[serde(default)]
    pub source_options: serde_json::Map<String, serde_json::Value>,
}

impl SyncServiceConfig {
    pub fn new(enabled: bool, interval_minutes: u32) -> Self {
        Self {
            enabled,
            interval_minutes,
            next_sync_after: None,
            source_options: serde_json::Map::new(),
        }
    }

    pub fn interval_is_valid(&self) -> bool {
        (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&self.interval_minutes)
    }

    pub fn option_bool(&self, key: &str, default: bool) -> bool {
        self.source_options
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }
}

impl Default for SyncServiceConfig {
    fn default() -> Self {
        Self::new(false, 30)
    }
}

// ============================================================================
// Scheduler Status
// ============================================================================

/// Outcome of the most recent tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Idle,
    Running,
    Success,
    Error,
}

/// Snapshot of one scheduled service, safe to hand to the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub name: String,
    pub enabled: bool,
    /// Whether a recurring timer is armed
    pub is_running: bool,
    pub run_status: SyncRunStatus,
    pub last_error: Option<String>,
    pub last_sync_log_id: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
}

// ============================================================================
// Sync Log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Success,
    Error,
}

/// One entry of the bounded rolling sync log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub id: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: SyncOutcome,
    pub item_count: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a successful tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub item_count: u64,
}

impl SyncReport {
    pub fn items(item_count: u64) -> Self {
        Self { item_count }
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Resumable position in a local data source.
///
/// Items are ordered by `(timestamp, id)`; a cursor admits only items strictly
/// after its position. `id: None` admits every item at `timestamp` or later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub id: Option<i64>,
}

impl Cursor {
    /// Everything from `timestamp` onwards
    pub fn since(timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, id: None }
    }

    /// Everything after the item `(timestamp, id)`
    pub fn after(timestamp: DateTime<Utc>, id: i64) -> Self {
        Self { timestamp, id: Some(id) }
    }

    fn key(&self) -> (DateTime<Utc>, i64) {
        (self.timestamp, self.id.unwrap_or(i64::MIN))
    }

    /// Whether an item at `(timestamp, id)` lies past this cursor
    pub fn admits(&self, timestamp: DateTime<Utc>, id: i64) -> bool {
        match self.id {
            Some(_) => (timestamp, id) > self.key(),
            None => timestamp >= self.timestamp,
        }
    }

    /// Whether `other` is strictly further along than `self`
    pub fn is_before(&self, other: &Cursor) -> bool {
        self.key() < other.key()
    }
}

/// One fetched batch plus the cursor to resume from (`None` when exhausted)
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next_cursor: None }
    }
}

// ============================================================================
// Backfill Progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillStatus {
    Idle,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl BackfillStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillPhase {
    Loading,
    Uploading,
}

/// Immutable snapshot of a backfill run.
///
/// `current`/`total` count fetch batches; `items_uploaded` counts items the
/// server confirmed, so it can lag behind when batches are filtered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillProgress {
    pub status: BackfillStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<BackfillPhase>,
    pub current: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_count: Option<u64>,
    pub items_uploaded: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_batch: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackfillProgress {
    pub fn idle() -> Self {
        Self {
            status: BackfillStatus::Idle,
            phase: None,
            current: 0,
            total: 0,
            item_count: None,
            items_uploaded: 0,
            cursor: None,
            failed_batch: None,
            error: None,
        }
    }

    pub fn loading() -> Self {
        Self {
            status: BackfillStatus::Running,
            phase: Some(BackfillPhase::Loading),
            ..Self::idle()
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: BackfillStatus::Error,
            error: Some(error),
            ..Self::idle()
        }
    }
}

impl Default for BackfillProgress {
    fn default() -> Self {
        Self::idle()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_cursor_since_is_inclusive() {
        let cursor = Cursor::since(ts(10));
        assert!(cursor.admits(ts(10), 1));
        assert!(cursor.admits(ts(11), -5));
        assert!(!cursor.admits(ts(9), 100));
    }

    #[test]
    fn test_cursor_after_is_exclusive() {
        let cursor = Cursor::after(ts(10), 7);
        assert!(!cursor.admits(ts(10), 7));
        assert!(!cursor.admits(ts(10), 6));
        assert!(cursor.admits(ts(10), 8));
        assert!(cursor.admits(ts(11), 0));
    }

    #[test]
    fn test_cursor_ordering() {
        assert!(Cursor::since(ts(10)).is_before(&Cursor::after(ts(10), 1)));
        assert!(Cursor::after(ts(10), 1).is_before(&Cursor::after(ts(10), 2)));
        assert!(!Cursor::after(ts(10), 2).is_before(&Cursor::after(ts(10), 2)));
    }

    #[test]
    fn test_config_interval_validation() {
        assert!(SyncServiceConfig::new(true, 5).interval_is_valid());
        assert!(!SyncServiceConfig::new(true, 0).interval_is_valid());
        assert!(!SyncServiceConfig::new(true, 2000).interval_is_valid());
    }

    #[test]
    fn test_config_wire_format() {
        let json = serde_json::json!({
            "enabled": true,
            "intervalMinutes": 5,
            "sourceOptions": { "includeAttachments": false }
        });
        let config: SyncServiceConfig = serde_json::from_value(json).unwrap();

        assert!(config.enabled);
        assert_eq!(config.interval_minutes, 5);
        assert!(config.next_sync_after.is_none());
        assert!(!config.option_bool("includeAttachments", true));
        assert!(config.option_bool("missing", true));
    }

    #[test]
    fn test_backfill_status_terminal() {
        assert!(!BackfillStatus::Idle.is_terminal());
        assert!(!BackfillStatus::Running.is_terminal());
        assert!(BackfillStatus::Completed.is_terminal());
        assert!(BackfillStatus::Error.is_terminal());
        assert!(BackfillStatus::Cancelled.is_terminal());
    }
}
