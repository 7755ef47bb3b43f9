use crate::blob_store::{object_key, BlobStore};
use crate::error::ApiError;
use crate::metadata_store::{MetadataStore, VideoMetadata};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Result of a completed upload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReceipt {
    pub id: Uuid,
    /// Time-bounded access URL for the stored bytes
    pub url: String,
}

/// Upload settings taken from the S3 configuration
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub key_prefix: String,
    pub content_type: String,
    pub url_expiry: Duration,
}

/// Moves recording bytes into the blob store and registers their metadata.
///
/// Every upload mints a fresh id, so uploading the same bytes twice yields
/// two independent recordings.
#[derive(Clone)]
pub struct UploadOrchestrator {
    blob_store: Arc<dyn BlobStore>,
    metadata_store: Arc<dyn MetadataStore>,
    settings: UploadSettings,
}

impl UploadOrchestrator {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        metadata_store: Arc<dyn MetadataStore>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            blob_store,
            metadata_store,
            settings,
        }
    }

    /// Store a recording and return its id with an access URL.
    ///
    /// A metadata write failure is logged and does not fail the upload:
    /// once the put succeeds the id and bytes are durable.
    #[instrument(skip(self, body), fields(size_bytes = body.as_ref().map(|b| b.len()).unwrap_or(0)))]
    pub async fn upload(
        &self,
        body: Option<Bytes>,
        display_name: Option<String>,
    ) -> Result<UploadReceipt, ApiError> {
        let body = body
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ApiError::Validation("No file".to_string()))?;

        let id = Uuid::new_v4();
        let key = object_key(
            &self.settings.key_prefix,
            &id.to_string(),
            &self.settings.content_type,
        );
        let size = body.len() as i64;

        self.blob_store
            .put(&key, body, &self.settings.content_type)
            .await
            .map_err(|e| {
                error!(error = %e, key = %key, "Failed to store recording");
                ApiError::from(e)
            })?;

        let url = self
            .blob_store
            .presign_get(&key, self.settings.url_expiry)
            .await
            .map_err(|e| {
                error!(error = %e, key = %key, "Failed to sign access URL");
                ApiError::from(e)
            })?;

        let metadata = VideoMetadata {
            id,
            created_at: Utc::now(),
            file_name: display_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("{}.webm", id)),
            size,
        };

        if let Err(e) = self.metadata_store.insert(&metadata).await {
            error!(error = %e, video_id = %id, "Failed to record video metadata, upload kept");
            metrics::counter!("storage.uploads.metadata_failed").increment(1);
        }

        metrics::counter!("storage.uploads.completed").increment(1);
        info!(video_id = %id, key = %key, size_bytes = size, "Recording uploaded");

        Ok(UploadReceipt { id, url })
    }
}
