use crate::capture::{Asset, AssetState};
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Server acknowledgement of a watch sample
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchAck {
    pub average_completion: u8,
    pub total_watch_time: f64,
}

/// Aggregates for one recording
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub views: u64,
    pub total_watch_time: f64,
    pub duration: f64,
    pub average_completion: u8,
    pub watch_sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadReceipt {
    pub id: Uuid,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub url: String,
    pub share_url: String,
}

/// Listing row returned by the storage service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListing {
    pub id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub file_name: String,
    pub size: i64,
    pub views: u64,
    pub average_completion: u8,
    pub duration: f64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum AnalyticsEvent<'a> {
    View {
        id: &'a str,
    },
    Watch {
        id: &'a str,
        watched: f64,
        duration: f64,
    },
}

#[derive(Debug, Deserialize)]
struct ViewAck {
    views: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// Sink for analytics events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsClient: Send + Sync {
    /// Count one view, returning the updated total
    async fn track_view(&self, video_id: &str) -> Result<u64>;

    /// Send one complete watch sample
    async fn track_watch(&self, video_id: &str, watched: f64, duration: f64) -> Result<WatchAck>;

    async fn fetch(&self, video_id: &str) -> Result<AnalyticsSummary>;
}

/// HTTP client for the storage service
#[derive(Clone)]
pub struct StorageClient {
    http: Client,
    base_url: String,
}

impl StorageClient {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CaptureError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.server.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload an asset and mark it uploaded on success
    #[instrument(skip(self, asset), fields(asset_id = %asset.id, size_bytes = asset.len()))]
    pub async fn upload(&self, asset: &mut Asset, name: Option<&str>) -> Result<UploadReceipt> {
        if asset.is_empty() {
            return Err(CaptureError::Validation("Asset is empty".to_string()));
        }

        let file_name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.webm", asset.id));
        let part = multipart::Part::bytes(asset.bytes.to_vec())
            .file_name(file_name.clone())
            .mime_str(&asset.content_type)
            .map_err(|e| CaptureError::Validation(format!("invalid content type: {e}")))?;
        let form = multipart::Form::new()
            .text("name", file_name)
            .part("file", part);

        let response = self
            .http
            .post(self.url("/api/upload"))
            .multipart(form)
            .send()
            .await?;
        let receipt: UploadReceipt = check(response).await?.json().await?;

        asset.state = AssetState::Uploaded;
        info!(video_id = %receipt.id, "Recording uploaded");
        Ok(receipt)
    }

    /// Playback links for a recording
    pub async fn resolve(&self, video_id: &str) -> Result<Delivery> {
        let response = self
            .http
            .get(self.url(&format!("/api/videos/{video_id}")))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// All recordings, newest first
    pub async fn list(&self) -> Result<Vec<VideoListing>> {
        let response = self.http.get(self.url("/api/videos")).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn post_event(&self, event: &AnalyticsEvent<'_>) -> Result<Response> {
        let response = self
            .http
            .post(self.url("/api/analytics"))
            .json(event)
            .send()
            .await?;
        check(response).await
    }
}

#[async_trait]
impl AnalyticsClient for StorageClient {
    async fn track_view(&self, video_id: &str) -> Result<u64> {
        let ack: ViewAck = self
            .post_event(&AnalyticsEvent::View { id: video_id })
            .await?
            .json()
            .await?;
        debug!(video_id, views = ack.views, "View tracked");
        Ok(ack.views)
    }

    async fn track_watch(&self, video_id: &str, watched: f64, duration: f64) -> Result<WatchAck> {
        let ack: WatchAck = self
            .post_event(&AnalyticsEvent::Watch {
                id: video_id,
                watched,
                duration,
            })
            .await?
            .json()
            .await?;
        debug!(video_id, watched, duration, "Watch sample tracked");
        Ok(ack)
    }

    async fn fetch(&self, video_id: &str) -> Result<AnalyticsSummary> {
        let response = self
            .http
            .get(self.url("/api/analytics"))
            .query(&[("id", video_id)])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Map a non-success response onto the client error taxonomy
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            error,
            details: Some(details),
        }) => format!("{error}: {details}"),
        Ok(ErrorBody { error, .. }) => error,
        Err(_) if text.is_empty() => status.to_string(),
        Err(_) => text,
    };

    warn!(status = %status, error = %message, "Storage service request failed");
    Err(match status {
        StatusCode::BAD_REQUEST => CaptureError::Validation(message),
        StatusCode::NOT_FOUND => CaptureError::NotFound(message),
        _ => CaptureError::Transport(format!("{status}: {message}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Multipart, Path, Query},
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use bytes::Bytes;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn analytics(Json(body): Json<Value>) -> (AxumStatus, Json<Value>) {
        match body["action"].as_str() {
            Some("view") => (AxumStatus::OK, Json(json!({"success": true, "views": 3}))),
            Some("watch") => (
                AxumStatus::OK,
                Json(json!({
                    "success": true,
                    "averageCompletion": 50,
                    "totalWatchTime": body["watched"]
                })),
            ),
            _ => (
                AxumStatus::BAD_REQUEST,
                Json(json!({"error": "Invalid action", "code": "VALIDATION_ERROR"})),
            ),
        }
    }

    async fn summary(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
        assert!(query.contains_key("id"));
        Json(json!({
            "views": 3,
            "totalWatchTime": 12.5,
            "duration": 10.0,
            "averageCompletion": 63,
            "watchSessions": 2
        }))
    }

    async fn video(Path(id): Path<String>) -> (AxumStatus, Json<Value>) {
        if id == "known" {
            (
                AxumStatus::OK,
                Json(json!({"url": "https://bucket/known", "shareUrl": "https://app/videos/known"})),
            )
        } else {
            (
                AxumStatus::NOT_FOUND,
                Json(json!({"error": "Video not found", "code": "NOT_FOUND"})),
            )
        }
    }

    async fn upload(mut multipart: Multipart) -> (AxumStatus, Json<Value>) {
        let mut saw_file = false;
        while let Ok(Some(field)) = multipart.next_field().await {
            if field.name() == Some("file") {
                saw_file = !field.bytes().await.unwrap_or_default().is_empty();
            }
        }
        if !saw_file {
            return (
                AxumStatus::BAD_REQUEST,
                Json(json!({"error": "No file", "code": "VALIDATION_ERROR"})),
            );
        }
        (
            AxumStatus::BAD_GATEWAY,
            Json(json!({
                "error": "Request failed at transport stage",
                "code": "TRANSPORT_ERROR",
                "stage": "transport",
                "details": "connection reset"
            })),
        )
    }

    async fn client() -> StorageClient {
        let router = Router::new()
            .route("/api/analytics", post(analytics).get(summary))
            .route("/api/videos/:id", get(video))
            .route("/api/upload", post(upload));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let mut config = CaptureConfig::default();
        config.server.base_url = format!("http://{addr}/");
        StorageClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_track_view_and_watch() {
        let client = client().await;

        assert_eq!(client.track_view("abc").await.unwrap(), 3);
        let ack = client.track_watch("abc", 5.0, 10.0).await.unwrap();
        assert_eq!(ack.average_completion, 50);
        assert_eq!(ack.total_watch_time, 5.0);

        let summary = client.fetch("abc").await.unwrap();
        assert_eq!(summary.watch_sessions, 2);
        assert_eq!(summary.average_completion, 63);
    }

    #[tokio::test]
    async fn test_resolve_maps_not_found() {
        let client = client().await;

        let delivery = client.resolve("known").await.unwrap();
        assert_eq!(delivery.share_url, "https://app/videos/known");

        match client.resolve("missing").await {
            Err(CaptureError::NotFound(message)) => assert_eq!(message, "Video not found"),
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_asset_captured() {
        let client = client().await;
        let mut asset = Asset::captured(Bytes::from_static(b"webm"), Some(1.0));

        match client.upload(&mut asset, Some("clip.webm")).await {
            Err(CaptureError::Transport(message)) => {
                assert!(message.contains("transport stage"));
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        assert_eq!(asset.state, AssetState::Captured);
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_asset_locally() {
        let client = client().await;
        let mut asset = Asset::captured(Bytes::new(), None);

        assert!(matches!(
            client.upload(&mut asset, None).await,
            Err(CaptureError::Validation(_))
        ));
    }

    #[test]
    fn test_event_wire_format() {
        let view = serde_json::to_value(AnalyticsEvent::View { id: "x" }).unwrap();
        assert_eq!(view, json!({"action": "view", "id": "x"}));

        let watch = serde_json::to_value(AnalyticsEvent::Watch {
            id: "x",
            watched: 5.0,
            duration: 10.0,
        })
        .unwrap();
        assert_eq!(
            watch,
            json!({"action": "watch", "id": "x", "watched": 5.0, "duration": 10.0})
        );
    }
}
