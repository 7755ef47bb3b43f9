//! Recorder Capture
//!
//! Client side of the screen recorder. Records a display plus microphone
//! stream into a single WebM asset, keeps the latest recording in a local
//! cache, trims it through an external transcoder, uploads it to the storage
//! service and reports views and watch progress while it is played back.
//!
//! ```text
//!  MediaDevices ──▶ CaptureController ──▶ LocalCache
//!                          │
//!                          ▼
//!                    TrimOperator (ffmpeg, stream copy)
//!                          │
//!                          ▼
//!                    StorageClient ──▶ storage service
//!                          ▲
//!     player events ──▶ WatchTracker / BrowsingSession
//! ```

pub mod cache;
pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod playback;
pub mod tracker;
pub mod trim;

pub use cache::{
    FileCache, LocalCache, MemoryCache, LATEST_RECORDING_DURATION_KEY, LATEST_RECORDING_KEY,
};
pub use capture::{
    Asset, AssetState, CaptureController, CaptureStatus, EncoderSession, MediaDevices,
    MediaStream, MediaTrack, TrackKind,
};
pub use client::{
    AnalyticsClient, AnalyticsSummary, Delivery, StorageClient, UploadReceipt, VideoListing,
    WatchAck,
};
pub use config::CaptureConfig;
pub use error::{CaptureError, Result};
pub use playback::{
    PlaybackEvent, PlaybackFailure, PlaybackState, WatchSample, WatchStateMachine,
};
pub use tracker::{BrowsingSession, ViewOutcome, WatchTracker};
pub use trim::{FfmpegTranscoder, Transcoder, TrimOperator, TrimRange};
