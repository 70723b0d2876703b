//! Service registry - owns one scheduler per named source

use super::models::{ServiceStatus, SyncReport};
use super::scheduler::{SchedulerError, SyncScheduler, SyncSource};
use crate::store::ConfigStore;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown sync service: {0}")]
    UnknownService(String),

    #[error("Sync service already registered: {0}")]
    DuplicateService(String),

    #[error("{service}: {source}")]
    Scheduler {
        service: String,
        #[source]
        source: SchedulerError,
    },
}

/// All scheduled services of the app, in registration order
pub struct ServiceRegistry {
    store: Arc<dyn ConfigStore>,
    schedulers: Vec<SyncScheduler>,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            schedulers: Vec::new(),
        }
    }

    /// Register a source. Names are unique; [`unregister`](Self::unregister)
    /// the old source first to replace it.
    pub fn register(&mut self, source: Arc<dyn SyncSource>) -> Result<SyncScheduler, RegistryError> {
        if self.get(source.name()).is_some() {
            return Err(RegistryError::DuplicateService(source.name().to_string()));
        }
        let scheduler = SyncScheduler::new(source, self.store.clone());
        self.schedulers.push(scheduler.clone());
        Ok(scheduler)
    }

    /// Stop and remove a source. Returns false when it was never registered.
    pub async fn unregister(&mut self, name: &str) -> bool {
        let Some(index) = self.schedulers.iter().position(|s| s.name() == name) else {
            return false;
        };
        let scheduler = self.schedulers.remove(index);
        scheduler.stop().await;
        true
    }

    pub fn get(&self, name: &str) -> Option<&SyncScheduler> {
        self.schedulers.iter().find(|s| s.name() == name)
    }

    fn require(&self, name: &str) -> Result<&SyncScheduler, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnknownService(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.schedulers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Start every enabled service. One failing service does not stop the others.
    pub async fn start_all(&self) -> Vec<RegistryError> {
        let mut errors = Vec::new();
        for scheduler in &self.schedulers {
            if let Err(e) = scheduler.start().await {
                log::error!("Failed to start {}: {}", scheduler.name(), e);
                errors.push(RegistryError::Scheduler {
                    service: scheduler.name().to_string(),
                    source: e,
                });
            }
        }
        errors
    }

    pub async fn stop_all(&self) {
        for scheduler in &self.schedulers {
            scheduler.stop().await;
        }
    }

    pub async fn restart(&self, name: &str) -> Result<(), RegistryError> {
        let scheduler = self.require(name)?;
        scheduler
            .restart()
            .await
            .map_err(|source| RegistryError::Scheduler {
                service: name.to_string(),
                source,
            })
    }

    pub async fn run_now(&self, name: &str) -> Result<SyncReport, RegistryError> {
        let scheduler = self.require(name)?;
        scheduler
            .run_now()
            .await
            .map_err(|source| RegistryError::Scheduler {
                service: name.to_string(),
                source,
            })
    }

    pub async fn update_config(
        &self,
        name: &str,
        enabled: bool,
        interval_minutes: u32,
    ) -> Result<(), RegistryError> {
        let scheduler = self.require(name)?;
        scheduler
            .update_config(enabled, interval_minutes)
            .await
            .map_err(|source| RegistryError::Scheduler {
                service: name.to_string(),
                source,
            })
    }

    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.schedulers.iter().map(|s| s.status()).collect()
    }
}
