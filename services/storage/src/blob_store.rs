use crate::config::S3Config;
use crate::error::BlobError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Object storage holding recording bytes.
///
/// `exists` distinguishes a definitive absence (`Ok(false)`) from a probe
/// that could not complete (`Err(BlobError::Transport)`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `body` under `key` in a single atomic put
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), BlobError>;

    /// Probe whether an object exists
    async fn exists(&self, key: &str) -> Result<bool, BlobError>;

    /// Mint a time-bounded GET URL for an object
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, BlobError>;

    /// Remove an object
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a new S3 blob store.
    ///
    /// Fails with `BlobError::Configuration` when the bucket is unset or no
    /// credentials can be resolved.
    pub async fn new(config: &S3Config) -> Result<Self, BlobError> {
        let bucket = config
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| {
                BlobError::Configuration("STORAGE__S3__BUCKET is not set".to_string())
            })?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let provider = aws_config.credentials_provider().ok_or_else(|| {
            BlobError::Configuration("no AWS credentials provider is configured".to_string())
        })?;
        provider.provide_credentials().await.map_err(|e| {
            BlobError::Configuration(format!("AWS credentials are missing: {}", e))
        })?;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self { client, bucket })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobError::Transport(DisplayErrorContext(&e).to_string()))?;

        debug!(key = %key, "Object stored");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(BlobError::Transport(DisplayErrorContext(&e).to_string()))
                }
            }
        }
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, BlobError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| BlobError::Signing(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| BlobError::Signing(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::Transport(DisplayErrorContext(&e).to_string()))?;

        debug!(key = %key, "Object deleted");
        Ok(())
    }
}

/// Object key for a recording: `{prefix}/{id}.{ext}`
pub fn object_key(prefix: &str, id: &str, content_type: &str) -> String {
    format!(
        "{prefix}/{id}.{ext}",
        prefix = prefix.trim_end_matches('/'),
        id = sanitize_path_component(id),
        ext = extension_for(content_type)
    )
}

/// Whether `component` maps to an object key unchanged
pub fn is_safe_path_component(component: &str) -> bool {
    !component.is_empty() && sanitize_path_component(component) == component
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// File extension for a recording content type
fn extension_for(content_type: &str) -> &'static str {
    match content_type.to_lowercase().as_str() {
        "video/webm" => "webm",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        _ => "bin",
    }
}
