//! Recorder Storage Service
//!
//! Server side of the screen recorder: accepts finished recordings, stores
//! them in S3, registers their metadata in PostgreSQL, mints time-bounded
//! playback links, and aggregates view and watch-completion analytics.
//!
//! ## Features
//!
//! - **Upload**: multipart upload to S3 under an id-derived key with a 7-day
//!   access URL; metadata registration is best-effort
//! - **Delivery**: existence probe plus a 1-hour access URL and a share link
//!   on the web application
//! - **Analytics**: per-id atomic read-modify-write of view counts and watch
//!   completion samples, safe under concurrent writers
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API (axum)
//!  ┌──────────────────────────────────────────────────────┐
//!  │ /api/upload   /api/videos/:id   /api/analytics       │
//!  └──────┬───────────────┬───────────────────┬───────────┘
//!         ▼               ▼                   ▼
//!  ┌──────────────┐ ┌──────────────┐   ┌──────────────┐
//!  │ Upload       │ │ Delivery     │   │ Analytics    │
//!  │ Orchestrator │ │ Resolver     │   │ Engine       │
//!  └──────┬───────┘ └──────┬───────┘   └──────┬───────┘
//!         │   ┌────────────┘                  │
//!         ▼   ▼                               ▼
//!  ┌──────────────┐ ┌──────────────┐   ┌──────────────┐
//!  │ Blob Store   │ │ Metadata     │   │ Analytics    │
//!  │ (S3)         │ │ Store        │   │ Store        │
//!  └──────────────┘ └──────────────┘   └──────────────┘
//! ```

pub mod analytics;
pub mod api;
pub mod blob_store;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod metadata_store;
pub mod upload;

pub use analytics::{
    completion_percentage, AnalyticsEngine, AnalyticsRecord, AnalyticsStore, AnalyticsSummary,
    MemoryAnalyticsStore, PgAnalyticsStore,
};
pub use api::{create_router, start_api_server, AppState};
pub use blob_store::{BlobStore, S3BlobStore};
pub use config::{Config, StoreBackend};
pub use delivery::{Delivery, DeliveryResolver};
pub use error::{ApiError, BlobError, Stage, StoreError};
pub use metadata_store::{MemoryMetadataStore, MetadataStore, PgMetadataStore, VideoMetadata};
pub use upload::{UploadOrchestrator, UploadReceipt, UploadSettings};
