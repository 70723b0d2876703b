//! Sync error types

use crate::api::TransportError;
use crate::crypto::CryptoError;
use crate::store::{SettingsError, StoreError};
use thiserror::Error;

/// Failure reading from a local data source
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// The data source cannot be opened (missing file, no permission)
    #[error("Data source unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read data source: {0}")]
    Read(String),
}

/// Failure of one sync tick or backfill batch
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Upload failed: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Settings error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Errors that will keep failing until the user changes settings
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Crypto(e) => e.is_configuration(),
            Self::Transport(e) => e.is_configuration(),
            Self::Source(SourceError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

impl From<SettingsError> for SyncError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Store(e) => Self::Store(e),
            SettingsError::Crypto(e) => Self::Crypto(e),
        }
    }
}
