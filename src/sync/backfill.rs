//! Backfill Engine - one-off bulk import of historical records
//!
//! Pages through a [`LocalDataSource`] from `now - window_days` in fixed-size
//! batches, encrypting and uploading each one. Progress is published as
//! immutable snapshots over a `watch` channel so the UI can poll or subscribe
//! without touching engine state.
//!
//! States: `Idle -> Running{loading} -> Running{uploading} -> Completed | Error | Cancelled`

use super::models::{BackfillPhase, BackfillProgress, BackfillStatus, Cursor};
use super::source::{build_batch, LocalDataSource, SyncRecord};
use crate::api::TransportClient;
use crate::store::{ConfigStore, ConfigStoreExt};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_WINDOW_DAYS: u32 = 120;

/// Cancellation handle of the run in flight, if any
type ActiveRun = StdMutex<Option<CancellationToken>>;

fn lock_active(active: &ActiveRun) -> MutexGuard<'_, Option<CancellationToken>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clears the active run however it ends
struct RunGuard<'a>(&'a ActiveRun);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *lock_active(self.0) = None;
    }
}

/// Start of the import window; windows reaching past the calendar start at its origin
fn window_start(now: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
    chrono::Duration::try_days(i64::from(window_days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Backfill for one source. Hold one engine per source; runs never overlap.
pub struct BackfillEngine<S: LocalDataSource> {
    name: String,
    source: Arc<S>,
    transport: Arc<dyn TransportClient>,
    store: Arc<dyn ConfigStore>,
    batch_size: usize,
    active: ActiveRun,
    progress: watch::Sender<BackfillProgress>,
}

impl<S: LocalDataSource> BackfillEngine<S> {
    pub fn new(
        name: impl Into<String>,
        source: Arc<S>,
        transport: Arc<dyn TransportClient>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let (progress, _) = watch::channel(BackfillProgress::idle());
        Self {
            name: name.into(),
            source,
            transport,
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            active: StdMutex::new(None),
            progress,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Import everything from the last `window_days` days.
    ///
    /// A second call while a run is in flight is a logged no-op returning the
    /// current snapshot. Returns the final snapshot otherwise.
    pub async fn run(&self, window_days: u32) -> BackfillProgress {
        let cancel = {
            let mut active = lock_active(&self.active);
            if active.is_some() {
                log::info!("{}: backfill already in progress", self.name);
                return self.get_progress();
            }
            let token = CancellationToken::new();
            *active = Some(token.clone());
            token
        };
        let _guard = RunGuard(&self.active);

        self.publish(BackfillProgress::loading());
        log::info!("{}: backfill started ({} days)", self.name, window_days);

        let progress = self.import(window_days, &cancel).await;
        match progress.status {
            BackfillStatus::Completed => log::info!(
                "{}: backfill completed, {} items uploaded",
                self.name,
                progress.items_uploaded
            ),
            BackfillStatus::Cancelled => log::info!(
                "{}: backfill cancelled after {} items",
                self.name,
                progress.items_uploaded
            ),
            _ => log::error!(
                "{}: backfill failed: {}",
                self.name,
                progress.error.as_deref().unwrap_or("unknown error")
            ),
        }
        progress
    }

    /// Request cancellation; observed before the next batch is fetched.
    ///
    /// Returns false when no run is in flight.
    pub fn cancel(&self) -> bool {
        match lock_active(&self.active).as_ref() {
            Some(token) => {
                log::info!("{}: backfill cancellation requested", self.name);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock_active(&self.active).is_some()
    }

    pub fn get_progress(&self) -> BackfillProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BackfillProgress> {
        self.progress.subscribe()
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    fn publish(&self, progress: BackfillProgress) {
        self.progress.send_replace(progress);
    }

    fn finish(&self, mut progress: BackfillProgress, status: BackfillStatus) -> BackfillProgress {
        progress.status = status;
        progress.phase = None;
        self.publish(progress.clone());
        progress
    }

    async fn import(&self, window_days: u32, cancel: &CancellationToken) -> BackfillProgress {
        if let Err(e) = self.source.open().await {
            return self.finish(BackfillProgress::failed(e.to_string()), BackfillStatus::Error);
        }

        let since = window_start(Utc::now(), window_days);

        // Best effort: the count is only used for progress display
        let count = match self.source.count_since(since).await {
            Ok(count) => count,
            Err(e) => {
                log::warn!("{}: could not count items: {}", self.name, e);
                None
            }
        };

        if count == Some(0) {
            let progress = BackfillProgress {
                item_count: Some(0),
                ..BackfillProgress::idle()
            };
            return self.finish(progress, BackfillStatus::Completed);
        }

        let crypto = match self.store.encryption_service() {
            Ok(crypto) => crypto,
            Err(e) => {
                return self.finish(
                    BackfillProgress::failed(format!("Encryption unavailable: {}", e)),
                    BackfillStatus::Error,
                );
            }
        };
        let ignored = self.store.ignored_chat_ids(&self.name).unwrap_or_else(|e| {
            log::warn!("{}: could not load ignored chats: {}", self.name, e);
            Vec::new()
        });

        let batch_size = self.batch_size as u64;
        let mut progress = BackfillProgress {
            status: BackfillStatus::Running,
            phase: Some(BackfillPhase::Uploading),
            total: count.map(|c| c.div_ceil(batch_size)).unwrap_or(0),
            item_count: count,
            ..BackfillProgress::idle()
        };
        self.publish(progress.clone());

        let mut cursor = Cursor::since(since);

        loop {
            if cancel.is_cancelled() {
                return self.finish(progress, BackfillStatus::Cancelled);
            }

            let batch_number = progress.current + 1;
            let page = match self.source.fetch_since(&cursor, self.batch_size).await {
                Ok(page) => page,
                Err(e) => {
                    progress.failed_batch = Some(batch_number);
                    progress.error = Some(format!(
                        "Failed to read batch {}. {} items uploaded in total. Error: {}",
                        batch_number, progress.items_uploaded, e
                    ));
                    return self.finish(progress, BackfillStatus::Error);
                }
            };
            tokio::task::yield_now().await;
            progress.current = batch_number;

            match build_batch(&page.items, &ignored, crypto.as_ref()) {
                Ok(Some((body, count))) => {
                    let path = <S::Item as SyncRecord>::UPLOAD_PATH;
                    if let Err(e) = self.transport.upload_json(path, &body).await {
                        progress.failed_batch = Some(batch_number);
                        progress.error = Some(format!(
                            "Failed to upload batch {}. {} items uploaded in total. Error: {}",
                            batch_number, progress.items_uploaded, e
                        ));
                        return self.finish(progress, BackfillStatus::Error);
                    }
                    progress.items_uploaded += count as u64;
                    tokio::task::yield_now().await;
                }
                Ok(None) => {
                    log::debug!("{}: batch {} fully filtered", self.name, batch_number);
                }
                Err(e) => {
                    progress.failed_batch = Some(batch_number);
                    progress.error = Some(format!(
                        "Failed to encrypt batch {}. {} items uploaded in total. Error: {}",
                        batch_number, progress.items_uploaded, e
                    ));
                    return self.finish(progress, BackfillStatus::Error);
                }
            }

            match page.next_cursor {
                Some(next) if cursor.is_before(&next) => {
                    cursor = next;
                    progress.cursor = Some(cursor.clone());
                    self.publish(progress.clone());
                }
                Some(_) => {
                    progress.failed_batch = Some(batch_number);
                    progress.error = Some(format!(
                        "Source cursor did not advance after batch {}. {} items uploaded in total.",
                        batch_number, progress.items_uploaded
                    ));
                    return self.finish(progress, BackfillStatus::Error);
                }
                None => break,
            }
        }

        self.finish(progress, BackfillStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_start() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(window_start(now, 0), now);
        assert_eq!(window_start(now, 120), now - chrono::Duration::days(120));
        assert_eq!(window_start(now, u32::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
