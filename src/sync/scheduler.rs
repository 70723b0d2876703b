//! Recurring Sync Scheduler
//!
//! Runs one [`SyncSource`] on a fixed interval. Each scheduler owns its timer
//! task and status; sources only supply the `on_start`/`on_stop`/`on_sync`
//! hooks.
//!
//! Lifecycle: `Stopped -> Starting -> Armed`, back to `Stopped` on `stop()`.
//! At most one tick per source is in flight; a tick that would overlap a
//! running one is skipped (scheduled) or rejected (`run_now`).

use super::error::SyncError;
use super::history::SyncHistory;
use super::models::{
    ServiceStatus, SyncOutcome, SyncReport, SyncRunStatus, SyncServiceConfig,
    MAX_INTERVAL_MINUTES, MIN_INTERVAL_MINUTES,
};
use crate::store::{ConfigStore, ConfigStoreExt, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Source Hooks
// ============================================================================

/// Lifecycle hooks of one named data source
#[async_trait]
pub trait SyncSource: Send + Sync + 'static {
    /// Stable name, also the settings key prefix
    fn name(&self) -> &str;

    /// Config used until the user saves one
    fn default_config(&self) -> SyncServiceConfig;

    /// Called once before the first tick (e.g. open a persistent handle)
    async fn on_start(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn on_stop(&self) {}

    /// One export pass. Must advance its watermark only after the upload is
    /// confirmed, and leave it untouched on failure.
    async fn on_sync(&self) -> Result<SyncReport, SyncError>;
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("A sync is already running for this source")]
    AlreadySyncing,

    #[error("Sync is disabled for this source")]
    Disabled,

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Failed to start source: {0}")]
    Start(#[source] SyncError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Settings error: {0}")]
    Store(#[from] StoreError),
}

fn validate_interval(interval_minutes: u32) -> Result<(), SchedulerError> {
    if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&interval_minutes) {
        return Err(SchedulerError::InvalidInterval(format!(
            "Interval must be {}-{} minutes, got {}",
            MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES, interval_minutes
        )));
    }
    Ok(())
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Stopped,
    Starting,
    Armed,
}

struct SchedulerState {
    lifecycle: Lifecycle,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    /// Wall-clock target plus the runtime deadline it was derived from
    next_run: Option<(DateTime<Utc>, Instant)>,
    run_status: SyncRunStatus,
    last_error: Option<String>,
    last_sync_log_id: Option<String>,
    last_run_at: Option<DateTime<Utc>>,
}

struct Inner {
    source: Arc<dyn SyncSource>,
    store: Arc<dyn ConfigStore>,
    history: SyncHistory,
    state: StdMutex<SchedulerState>,
    /// Held for the duration of a tick
    tick_lock: Mutex<()>,
    /// Serializes start/stop/restart
    lifecycle_lock: Mutex<()>,
}

/// Recurring scheduler for one source
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(source: Arc<dyn SyncSource>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                history: SyncHistory::new(store.clone()),
                source,
                store,
                state: StdMutex::new(SchedulerState {
                    lifecycle: Lifecycle::Stopped,
                    cancel: None,
                    task: None,
                    next_run: None,
                    run_status: SyncRunStatus::Idle,
                    last_error: None,
                    last_sync_log_id: None,
                    last_run_at: None,
                }),
                tick_lock: Mutex::new(()),
                lifecycle_lock: Mutex::new(()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.source.name()
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persisted config, or the source default
    pub fn config(&self) -> Result<SyncServiceConfig, StoreError> {
        self.inner
            .store
            .service_config(self.name(), self.inner.source.default_config())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the source: `on_start`, one immediate tick, then arm the timer.
    ///
    /// No-op when disabled or already started. A failing first tick is
    /// logged and does not prevent the timer from being armed.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let _lifecycle = self.inner.lifecycle_lock.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<(), SchedulerError> {
        if self.lock_state().lifecycle != Lifecycle::Stopped {
            log::debug!("{}: scheduler already started", self.name());
            return Ok(());
        }

        let config = self.config()?;
        if !config.enabled {
            log::info!("{}: sync disabled, not scheduling", self.name());
            return Ok(());
        }
        validate_interval(config.interval_minutes)?;

        self.lock_state().lifecycle = Lifecycle::Starting;

        if let Err(e) = self.inner.source.on_start().await {
            log::error!("{}: failed to start: {}", self.name(), e);
            self.lock_state().lifecycle = Lifecycle::Stopped;
            return Err(SchedulerError::Start(e));
        }

        // Failures are already recorded in the sync log
        let _ = self.scheduled_tick().await;

        self.arm(config.interval_minutes);
        log::info!(
            "{}: scheduler started (interval: {} minutes)",
            self.name(),
            config.interval_minutes
        );
        Ok(())
    }

    /// Cancel the timer, wait for an in-flight tick, then call `on_stop`
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle_lock.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        let (cancel, task, was_started) = {
            let mut state = self.lock_state();
            let was_started = state.lifecycle != Lifecycle::Stopped;
            state.lifecycle = Lifecycle::Stopped;
            state.next_run = None;
            (state.cancel.take(), state.task.take(), was_started)
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    log::error!("{}: scheduler task panicked", self.name());
                }
            }
        }

        if was_started {
            self.inner.source.on_stop().await;
            self.persist_next_sync(None);
            log::info!("{}: scheduler stopped", self.name());
        }
    }

    /// `stop()` then `start()`, used after a config change
    pub async fn restart(&self) -> Result<(), SchedulerError> {
        let _lifecycle = self.inner.lifecycle_lock.lock().await;
        self.stop_locked().await;
        self.start_locked().await
    }

    /// Validate, persist and apply a new schedule
    pub async fn update_config(
        &self,
        enabled: bool,
        interval_minutes: u32,
    ) -> Result<(), SchedulerError> {
        validate_interval(interval_minutes)?;

        let mut config = self.config()?;
        config.enabled = enabled;
        config.interval_minutes = interval_minutes;
        self.inner.store.set_service_config(self.name(), &config)?;

        log::info!(
            "{}: config updated: enabled={}, interval={} minutes",
            self.name(),
            enabled,
            interval_minutes
        );
        self.restart().await
    }

    // ========================================================================
    // Ticks
    // ========================================================================

    /// Out-of-band tick that leaves the recurring schedule alone.
    ///
    /// Rejected with [`SchedulerError::AlreadySyncing`] while a tick runs.
    pub async fn run_now(&self) -> Result<SyncReport, SchedulerError> {
        if !self.config()?.enabled {
            return Err(SchedulerError::Disabled);
        }

        let _tick = self
            .inner
            .tick_lock
            .try_lock()
            .map_err(|_| SchedulerError::AlreadySyncing)?;

        if self.lock_state().lifecycle != Lifecycle::Stopped {
            return Ok(self.execute_tick().await?);
        }

        // Not scheduled: bracket the tick with the source hooks
        let _lifecycle = self.inner.lifecycle_lock.lock().await;
        if self.lock_state().lifecycle != Lifecycle::Stopped {
            return Ok(self.execute_tick().await?);
        }
        self.inner
            .source
            .on_start()
            .await
            .map_err(SchedulerError::Start)?;
        let result = self.execute_tick().await;
        self.inner.source.on_stop().await;
        Ok(result?)
    }

    /// Tick unless another one is in flight
    async fn scheduled_tick(&self) -> Option<Result<SyncReport, SyncError>> {
        match self.inner.tick_lock.try_lock() {
            Ok(_tick) => Some(self.execute_tick().await),
            Err(_) => {
                log::info!("{}: previous sync still running, skipping tick", self.name());
                None
            }
        }
    }

    /// Run `on_sync` and record the outcome. Caller holds `tick_lock`.
    async fn execute_tick(&self) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        {
            let mut state = self.lock_state();
            state.run_status = SyncRunStatus::Running;
            state.last_run_at = Some(Utc::now());
        }
        log::info!("{}: sync started", self.name());

        let result = self.inner.source.on_sync().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, item_count, error) = match &result {
            Ok(report) => {
                log::info!(
                    "{}: sync completed, {} items in {}ms",
                    self.name(),
                    report.item_count,
                    duration_ms
                );
                (SyncOutcome::Success, report.item_count, None)
            }
            Err(e) => {
                log::error!("{}: sync failed: {}", self.name(), e);
                (SyncOutcome::Error, 0, Some(e.to_string()))
            }
        };

        let log_id = match self.inner.history.record_sync(
            self.name(),
            outcome,
            item_count,
            duration_ms,
            error.clone(),
        ) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("{}: failed to record sync log: {}", self.name(), e);
                None
            }
        };

        {
            let mut state = self.lock_state();
            state.run_status = match outcome {
                SyncOutcome::Success => SyncRunStatus::Success,
                SyncOutcome::Error => SyncRunStatus::Error,
            };
            state.last_error = error;
            if log_id.is_some() {
                state.last_sync_log_id = log_id;
            }
        }

        result
    }

    // ========================================================================
    // Timer
    // ========================================================================

    fn arm(&self, interval_minutes: u32) {
        let interval = Duration::from_secs(60 * u64::from(interval_minutes));
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + interval;
        let next = self.set_next_run(deadline);

        let task = tokio::spawn(Self::timer_loop(
            Arc::downgrade(&self.inner),
            cancel.clone(),
            deadline,
            interval,
        ));

        let mut state = self.lock_state();
        state.lifecycle = Lifecycle::Armed;
        state.cancel = Some(cancel);
        state.task = Some(task);
        drop(state);

        self.persist_next_sync(Some(next));
    }

    /// Fires every `interval`; a tick is never pre-empted by cancellation
    async fn timer_loop(
        inner: Weak<Inner>,
        cancel: CancellationToken,
        mut deadline: Instant,
        interval: Duration,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            let Some(strong) = inner.upgrade() else { break };
            let scheduler = SyncScheduler { inner: strong };
            let _ = scheduler.scheduled_tick().await;

            // Runs missed while the tick was slow are coalesced
            let now = Instant::now();
            deadline += interval;
            if deadline <= now {
                deadline = now + interval;
            }

            if cancel.is_cancelled() {
                break;
            }
            let next = scheduler.set_next_run(deadline);
            scheduler.persist_next_sync(Some(next));
        }
    }

    fn set_next_run(&self, deadline: Instant) -> DateTime<Utc> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let next = Utc::now()
            + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
        self.lock_state().next_run = Some((next, deadline));
        next
    }

    /// `next_sync_after` is informational; the armed timer is authoritative.
    /// Written under its own key, never through the config.
    fn persist_next_sync(&self, next: Option<DateTime<Utc>>) {
        if let Err(e) = self.inner.store.set_next_sync_after(self.name(), next) {
            log::warn!("{}: failed to persist next sync time: {}", self.name(), e);
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Whether the recurring timer is armed
    pub fn is_running(&self) -> bool {
        self.lock_state().lifecycle == Lifecycle::Armed
    }

    /// Whether a tick is in flight right now
    pub fn is_syncing(&self) -> bool {
        self.inner.tick_lock.try_lock().is_err()
    }

    pub fn get_next_run_time(&self) -> Option<DateTime<Utc>> {
        self.lock_state().next_run.map(|(at, _)| at)
    }

    pub fn get_time_until_next_run(&self) -> Option<Duration> {
        self.lock_state()
            .next_run
            .map(|(_, deadline)| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn status(&self) -> ServiceStatus {
        let enabled = self.config().map(|c| c.enabled).unwrap_or(false);
        let state = self.lock_state();
        ServiceStatus {
            name: self.name().to_string(),
            enabled,
            is_running: state.lifecycle == Lifecycle::Armed,
            run_status: state.run_status,
            last_error: state.last_error.clone(),
            last_sync_log_id: state.last_sync_log_id.clone(),
            last_run_at: state.last_run_at,
            next_run_time: state.next_run.map(|(at, _)| at),
        }
    }

    pub fn history(&self) -> &SyncHistory {
        &self.inner.history
    }
}
