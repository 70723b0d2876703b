//! In-memory fakes for scheduler, backfill and service tests

use super::error::SourceError;
use super::models::{Cursor, Page};
use super::source::{LocalDataSource, SyncRecord};
use crate::api::{MultipartUpload, TransportClient, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub path: String,
    pub body: Option<Value>,
    pub multipart: Option<MultipartUpload>,
}

/// Records uploads; can fail a given call or block until released
#[derive(Default)]
pub struct RecordingTransport {
    uploads: Mutex<Vec<RecordedUpload>>,
    calls: AtomicUsize,
    /// 1-based call number that fails with a 500
    fail_on_call: Mutex<Option<usize>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on_call(&self, call: usize) {
        *self.fail_on_call.lock().unwrap() = Some(call);
    }

    /// Uploads wait for a permit from the returned semaphore
    pub fn gated(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        if *self.fail_on_call.lock().unwrap() == Some(call) {
            return Err(TransportError::Status {
                status: 500,
                body: "Internal Server Error".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TransportClient for RecordingTransport {
    async fn upload_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        self.enter().await?;
        self.uploads.lock().unwrap().push(RecordedUpload {
            path: path.to_string(),
            body: Some(body.clone()),
            multipart: None,
        });
        Ok(Value::Null)
    }

    async fn upload_multipart(
        &self,
        path: &str,
        upload: MultipartUpload,
    ) -> Result<Option<Value>, TransportError> {
        self.enter().await?;
        self.uploads.lock().unwrap().push(RecordedUpload {
            path: path.to_string(),
            body: None,
            multipart: Some(upload),
        });
        Ok(None)
    }
}

// ============================================================================
// Data Source
// ============================================================================

/// Sorted in-memory records honouring the cursor contract
pub struct VecSource<T> {
    items: Mutex<Vec<T>>,
    fetches: Mutex<Vec<Vec<Cursor>>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    countable: bool,
    open_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl<T: SyncRecord + Clone> VecSource<T> {
    pub fn new(items: Vec<T>) -> Arc<Self> {
        Self::build(items, true)
    }

    /// A source whose `count_since` reports `None`
    pub fn uncountable(items: Vec<T>) -> Arc<Self> {
        Self::build(items, false)
    }

    fn build(mut items: Vec<T>, countable: bool) -> Arc<Self> {
        items.sort_by_key(|item| {
            let c = item.cursor();
            (c.timestamp, c.id)
        });
        Arc::new(Self {
            items: Mutex::new(items),
            fetches: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            countable,
            open_gate: Mutex::new(None),
        })
    }

    pub fn push(&self, item: T) {
        let mut items = self.items.lock().unwrap();
        items.push(item);
        items.sort_by_key(|item| {
            let c = item.cursor();
            (c.timestamp, c.id)
        });
    }

    /// `open` waits for a permit from the returned semaphore
    pub fn gate_open(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.open_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Cursors of the items returned by each fetch
    pub fn fetched_pages(&self) -> Vec<Vec<Cursor>> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl<T: SyncRecord + Clone> LocalDataSource for VecSource<T> {
    type Item = T;

    async fn open(&self) -> Result<(), SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let gate = self.open_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<Option<u64>, SourceError> {
        if !self.countable {
            return Ok(None);
        }
        let items = self.items.lock().unwrap();
        Ok(Some(
            items.iter().filter(|i| i.cursor().timestamp >= since).count() as u64,
        ))
    }

    async fn fetch_since(&self, cursor: &Cursor, limit: usize) -> Result<Page<T>, SourceError> {
        let items = self.items.lock().unwrap();
        let remaining: Vec<T> = items
            .iter()
            .filter(|item| {
                let c = item.cursor();
                cursor.admits(c.timestamp, c.id.unwrap_or(i64::MIN))
            })
            .cloned()
            .collect();

        let has_more = remaining.len() > limit;
        let page: Vec<T> = remaining.into_iter().take(limit).collect();
        self.fetches
            .lock()
            .unwrap()
            .push(page.iter().map(|i| i.cursor()).collect());

        let next_cursor = if has_more {
            page.last().map(|i| i.cursor())
        } else {
            None
        };
        Ok(Page {
            items: page,
            next_cursor,
        })
    }
}
