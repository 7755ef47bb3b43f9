use crate::analytics::{AnalyticsEngine, AnalyticsSummary};
use crate::blob_store::{object_key, BlobStore};
use crate::config::ApiConfig;
use crate::delivery::{Delivery, DeliveryResolver};
use crate::error::ApiError;
use crate::metadata_store::{MetadataStore, VideoMetadata};
use crate::upload::{UploadOrchestrator, UploadReceipt};
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::Multipart, rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadOrchestrator,
    pub delivery: DeliveryResolver,
    pub analytics: AnalyticsEngine,
    pub metadata_store: Arc<dyn MetadataStore>,
    pub blob_store: Arc<dyn BlobStore>,
    pub key_prefix: String,
    pub content_type: String,
    pub max_upload_bytes: usize,
}

/// Analytics write request
#[derive(Debug, Deserialize)]
pub struct AnalyticsRequest {
    pub id: Option<String>,
    pub action: Option<String>,
    pub watched: Option<f64>,
    pub duration: Option<f64>,
}

/// Response to a counted view
#[derive(Debug, Serialize)]
pub struct ViewResponse {
    pub success: bool,
    pub views: u64,
}

/// Response to a recorded watch sample
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    pub success: bool,
    pub average_completion: u8,
    pub total_watch_time: f64,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub id: Option<String>,
}

/// Metadata row enriched with its analytics aggregates
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListing {
    #[serde(flatten)]
    pub metadata: VideoMetadata,
    pub views: u64,
    pub average_completion: u8,
    pub duration: f64,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/upload", post(upload_video))
        .route("/api/videos", get(list_videos))
        .route("/api/videos/:id", get(resolve_video).delete(delete_video))
        .route("/api/videos/:id/metadata", get(get_metadata))
        .route("/api/analytics", post(track_analytics).get(read_analytics))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "storage-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.metadata_store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Accept a multipart recording upload
#[instrument(skip(state, multipart))]
async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadReceipt>, ApiError> {
    let mut file = None;
    let mut name = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                if name.is_none() {
                    name = field.file_name().map(str::to_string);
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Failed to read file field: {e}")))?;
                file = Some(bytes);
            }
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Failed to read name field: {e}")))?;
                name = Some(text);
            }
            _ => {}
        }
    }

    let receipt = state.uploads.upload(file, name).await?;
    Ok(Json(receipt))
}

/// List recordings newest first, with their analytics
async fn list_videos(State(state): State<AppState>) -> Result<Json<Vec<VideoListing>>, ApiError> {
    let rows = state.metadata_store.list().await.map_err(|e| {
        error!(error = %e, "Failed to list videos");
        ApiError::from(e)
    })?;

    let listing = try_join_all(rows.into_iter().map(|metadata| {
        let analytics = state.analytics.clone();
        async move {
            let record = analytics.read(&metadata.id.to_string()).await?;
            Ok::<_, ApiError>(VideoListing {
                views: record.views,
                average_completion: record.average_completion(),
                duration: record.duration,
                metadata,
            })
        }
    }))
    .await?;

    Ok(Json(listing))
}

/// Mint playback links for a recording
async fn resolve_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Delivery>, ApiError> {
    let delivery = state.delivery.resolve(&id).await?;
    Ok(Json(delivery))
}

/// Stored metadata for a recording
async fn get_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VideoMetadata>, ApiError> {
    let id = parse_video_id(&id)?;
    state
        .metadata_store
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))
}

/// Remove a recording's bytes and metadata. Analytics are kept.
#[instrument(skip(state))]
async fn delete_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let video_id = parse_video_id(&id)?;
    let key = object_key(&state.key_prefix, &video_id.to_string(), &state.content_type);

    let blob_present = match state.blob_store.exists(&key).await {
        Ok(present) => present,
        Err(e) => {
            warn!(error = %e, video_id = %id, "Could not verify video existence before delete");
            true
        }
    };
    if blob_present {
        state.blob_store.delete(&key).await?;
    }

    let row_removed = state.metadata_store.delete(video_id).await?;
    if !blob_present && !row_removed {
        return Err(ApiError::NotFound("Video not found".to_string()));
    }

    info!(video_id = %id, "Video deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Record a view or a watch sample
#[instrument(skip(state, payload))]
async fn track_analytics(
    State(state): State<AppState>,
    payload: Result<Json<AnalyticsRequest>, JsonRejection>,
) -> Result<axum::response::Response, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::Validation(format!("Invalid request body: {e}")))?;

    let id = request
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("Missing id".to_string()))?;

    match request.action.as_deref() {
        Some("view") => {
            let record = state.analytics.increment_view(&id).await?;
            Ok(Json(ViewResponse {
                success: true,
                views: record.views,
            })
            .into_response())
        }
        Some("watch") => {
            let (watched, duration) = match (request.watched, request.duration) {
                (Some(w), Some(d)) if w.is_finite() && d.is_finite() && w >= 0.0 && d >= 0.0 => {
                    (w, d)
                }
                _ => {
                    return Err(ApiError::Validation(
                        "watch requires non-negative watched and duration".to_string(),
                    ))
                }
            };
            let record = state
                .analytics
                .record_watch_session(&id, watched, duration)
                .await?;
            Ok(Json(WatchResponse {
                success: true,
                average_completion: record.average_completion(),
                total_watch_time: record.total_watch_time,
            })
            .into_response())
        }
        _ => Err(ApiError::Validation("Invalid action".to_string())),
    }
}

/// Read analytics aggregates for a recording
async fn read_analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsSummary>, ApiError> {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("Missing id".to_string()))?;

    let record = state.analytics.read(&id).await?;
    Ok(Json(record.summary()))
}

fn parse_video_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::Validation(format!("Invalid video id: {id}")))
}

/// Serve the API until `shutdown` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting storage API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
