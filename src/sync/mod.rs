//! Sync Module - recurring export and bulk backfill
//!
//! Moves local records (messages, contacts, screenshots) to the Contexter
//! server, optionally end-to-end encrypted.
//!
//! Architecture:
//! - SyncScheduler: one recurring timer per named source, single-flight ticks
//! - BackfillEngine: cancellable cursor-paginated bulk import
//! - ServiceRegistry: owns the schedulers of the app
//! - SyncHistory: bounded sync and request logs

pub mod backfill;
pub mod error;
pub mod history;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;


// Re-export commonly used types
pub use backfill::{BackfillEngine, DEFAULT_BATCH_SIZE, DEFAULT_WINDOW_DAYS};
pub use error::{SourceError, SyncError};
pub use history::{ApiRequestLog, RequestStatus, SyncHistory, MAX_LOGS};
pub use models::{
    BackfillPhase, BackfillProgress, BackfillStatus, Cursor, Page, ServiceStatus,
    SyncLogEntry, SyncOutcome, SyncReport, SyncRunStatus, SyncServiceConfig,
};
pub use registry::{RegistryError, ServiceRegistry};
pub use scheduler::{SchedulerError, SyncScheduler, SyncSource};
pub use source::{LocalDataSource, SyncRecord};
