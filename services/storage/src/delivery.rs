use crate::blob_store::{is_safe_path_component, object_key, BlobStore};
use crate::error::ApiError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Playback links for a stored recording
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    /// Time-bounded URL to the recording bytes
    pub url: String,
    /// Link to the application's playback page
    pub share_url: String,
}

/// Resolves a recording id into playback links
#[derive(Clone)]
pub struct DeliveryResolver {
    blob_store: Arc<dyn BlobStore>,
    key_prefix: String,
    content_type: String,
    url_expiry: Duration,
    app_base_url: String,
}

impl DeliveryResolver {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        key_prefix: String,
        content_type: String,
        url_expiry: Duration,
        app_base_url: String,
    ) -> Self {
        Self {
            blob_store,
            key_prefix,
            content_type,
            url_expiry,
            app_base_url,
        }
    }

    /// Page URL for a recording, independent of where the bytes live
    pub fn share_url(&self, id: &str) -> String {
        format!("{}/videos/{}", self.app_base_url.trim_end_matches('/'), id)
    }

    /// Probe for the recording and mint its links.
    ///
    /// A definitive absence yields `ApiError::NotFound("Video not found")`,
    /// as does an id that cannot name a stored object. A probe that fails for any other reason is logged and URL minting is
    /// attempted anyway.
    #[instrument(skip(self))]
    pub async fn resolve(&self, id: &str) -> Result<Delivery, ApiError> {
        if !is_safe_path_component(id) {
            metrics::counter!("delivery.not_found").increment(1);
            info!(video_id = %id, "Rejected malformed video id");
            return Err(ApiError::NotFound("Video not found".to_string()));
        }
        let key = object_key(&self.key_prefix, id, &self.content_type);

        match self.blob_store.exists(&key).await {
            Ok(true) => {}
            Ok(false) => {
                metrics::counter!("delivery.not_found").increment(1);
                info!(video_id = %id, "Video not found");
                return Err(ApiError::NotFound("Video not found".to_string()));
            }
            Err(e) => {
                warn!(error = %e, video_id = %id, "Could not verify video existence");
            }
        }

        let url = self.blob_store.presign_get(&key, self.url_expiry).await?;

        Ok(Delivery {
            url,
            share_url: self.share_url(id),
        })
    }
}
