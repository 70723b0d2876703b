//! Periodic screen capture upload
//!
//! Each tick captures one frame and posts it as `multipart/form-data` with
//! `screenshot`, `encrypted`, `width` and `height` fields. With a passphrase
//! set the image is wrapped in the binary `CTXE` frame and sent as
//! `application/octet-stream`.

use crate::api::{FilePart, MultipartUpload, TransportClient};
use crate::store::{ConfigStore, ConfigStoreExt};
use crate::sync::error::{SourceError, SyncError};
use crate::sync::models::{SyncReport, SyncServiceConfig};
use crate::sync::scheduler::SyncSource;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

pub const UPLOAD_PATH: &str = "/api/screenshots";
const WEBP_MIME: &str = "image/webp";

/// An already resized, webp-encoded frame
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait ScreenCapturer: Send + Sync + 'static {
    /// `None` when no screen is available
    async fn capture(&self) -> Result<Option<Screenshot>, SourceError>;
}

pub struct ScreenshotService<C> {
    capturer: Arc<C>,
    transport: Arc<dyn TransportClient>,
    store: Arc<dyn ConfigStore>,
}

impl<C: ScreenCapturer> ScreenshotService<C> {
    pub fn new(capturer: Arc<C>, transport: Arc<dyn TransportClient>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            capturer,
            transport,
            store,
        }
    }
}

#[async_trait]
impl<C: ScreenCapturer> SyncSource for ScreenshotService<C> {
    fn name(&self) -> &str {
        "screenCapture"
    }

    fn default_config(&self) -> SyncServiceConfig {
        SyncServiceConfig::new(true, 5)
    }

    async fn on_sync(&self) -> Result<SyncReport, SyncError> {
        let Some(shot) = self.capturer.capture().await? else {
            log::warn!("screenCapture: no screen sources found");
            return Ok(SyncReport::items(0));
        };

        let crypto = self.store.encryption_service()?;
        let encrypted = crypto.is_some();
        let (bytes, mime_type, extension) = match crypto {
            Some(service) => (
                service.encrypt_buffer(&shot.image)?,
                mime::APPLICATION_OCTET_STREAM.to_string(),
                "enc",
            ),
            None => (shot.image, WEBP_MIME.to_string(), "webp"),
        };

        let upload = MultipartUpload::new()
            .file(FilePart {
                field: "screenshot".to_string(),
                filename: format!("screenshot-{}.{}", Utc::now().timestamp_millis(), extension),
                mime_type,
                bytes,
            })
            .text("encrypted", encrypted.to_string())
            .text("width", shot.width.to_string())
            .text("height", shot.height.to_string());

        self.transport.upload_multipart(UPLOAD_PATH, upload).await?;
        log::info!("screenCapture: screenshot uploaded (encrypted: {})", encrypted);
        Ok(SyncReport::items(1))
    }
}
