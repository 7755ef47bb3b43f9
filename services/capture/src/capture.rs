use crate::cache::{LocalCache, LATEST_RECORDING_DURATION_KEY, LATEST_RECORDING_KEY};
use crate::error::{CaptureError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const RECORDING_CONTENT_TYPE: &str = "video/webm";

/// Lifecycle stage of an asset on the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Captured,
    Trimmed,
    Uploaded,
}

/// An immutable recording held by the client
#[derive(Debug, Clone)]
pub struct Asset {
    pub id: Uuid,
    pub bytes: Bytes,
    pub content_type: String,
    pub state: AssetState,
    /// Playable length in seconds, when known
    pub duration_secs: Option<f64>,
}

impl Asset {
    pub fn captured(bytes: Bytes, duration_secs: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes,
            content_type: RECORDING_CONTENT_TYPE.to_string(),
            state: AssetState::Captured,
            duration_secs,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reload the last persisted recording together with its duration
    pub async fn load_latest(cache: &dyn LocalCache) -> Result<Option<Asset>> {
        let Some(bytes) = cache.get(LATEST_RECORDING_KEY).await? else {
            return Ok(None);
        };

        let duration_secs = match cache.get(LATEST_RECORDING_DURATION_KEY).await? {
            Some(raw) => match serde_json::from_slice::<f64>(&raw) {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => Some(secs),
                _ => {
                    warn!("Ignoring unreadable cached recording duration");
                    None
                }
            },
            None => None,
        };
        Ok(Some(Asset::captured(bytes, duration_secs)))
    }

    /// Persist as the latest recording. A stale duration is dropped before
    /// the bytes are replaced, so a partial write never pairs new bytes with
    /// the previous recording's length.
    pub async fn persist_latest(&self, cache: &dyn LocalCache) -> Result<()> {
        cache.delete(LATEST_RECORDING_DURATION_KEY).await?;
        cache.put(LATEST_RECORDING_KEY, self.bytes.clone()).await?;
        if let Some(secs) = self.duration_secs {
            let raw = serde_json::to_vec(&secs)
                .map_err(|e| CaptureError::Cache(format!("failed to encode duration: {e}")))?;
            cache
                .put(LATEST_RECORDING_DURATION_KEY, Bytes::from(raw))
                .await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// A live capture track. Stopping releases the underlying device.
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn stop(&self);
}

/// A set of live tracks acquired together
#[derive(Clone, Default)]
pub struct MediaStream {
    pub tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    /// Combine the tracks of several streams into one
    pub fn combine(streams: impl IntoIterator<Item = MediaStream>) -> Self {
        Self {
            tracks: streams.into_iter().flat_map(|s| s.tracks).collect(),
        }
    }
}

/// Encoder output for one recording.
///
/// The encoder pushes chunks in order and closes the channel after its final
/// chunk once `stop` is cancelled.
pub struct EncoderSession {
    pub chunks: mpsc::Receiver<Bytes>,
    pub stop: CancellationToken,
}

/// Capture devices and the encoder that turns their tracks into chunks
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Screen or window surface
    async fn display_stream(&self) -> Result<MediaStream>;

    /// Microphone input
    async fn audio_stream(&self) -> Result<MediaStream>;

    fn start_encoder(&self, stream: &MediaStream) -> Result<EncoderSession>;
}

/// Stops every held track when dropped
struct TrackGuard {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl TrackGuard {
    fn new(stream: &MediaStream) -> Self {
        Self {
            tracks: stream.tracks.clone(),
        }
    }
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        for track in self.tracks.drain(..) {
            track.stop();
        }
    }
}

struct ActiveRecording {
    _tracks: TrackGuard,
    stop: CancellationToken,
    collector: JoinHandle<Vec<Bytes>>,
    started_at: Instant,
}

enum ControllerState {
    Idle,
    Recording(ActiveRecording),
    Stopped(Asset),
}

/// Observable controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    Recording,
    Stopped,
}

/// Owns the record state machine: Idle -> Recording -> Stopped -> Idle
pub struct CaptureController {
    devices: Arc<dyn MediaDevices>,
    cache: Arc<dyn LocalCache>,
    state: Mutex<ControllerState>,
}

impl CaptureController {
    pub fn new(devices: Arc<dyn MediaDevices>, cache: Arc<dyn LocalCache>) -> Self {
        Self {
            devices,
            cache,
            state: Mutex::new(ControllerState::Idle),
        }
    }

    pub async fn status(&self) -> CaptureStatus {
        match &*self.state.lock().await {
            ControllerState::Idle => CaptureStatus::Idle,
            ControllerState::Recording(_) => CaptureStatus::Recording,
            ControllerState::Stopped(_) => CaptureStatus::Stopped,
        }
    }

    /// The asset produced by the last stop, if any
    pub async fn asset(&self) -> Option<Asset> {
        match &*self.state.lock().await {
            ControllerState::Stopped(asset) => Some(asset.clone()),
            _ => None,
        }
    }

    /// Acquire the display and audio streams and begin recording.
    ///
    /// Any previous asset is discarded. If either stream cannot be acquired
    /// the controller returns to Idle and nothing stays held.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, ControllerState::Recording(_)) {
            return Err(CaptureError::AlreadyRecording);
        }
        *state = ControllerState::Idle;

        let display = self.devices.display_stream().await.map_err(|e| {
            warn!(error = %e, "Display capture unavailable");
            e
        })?;

        let audio = match self.devices.audio_stream().await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(error = %e, "Audio capture unavailable");
                drop(TrackGuard::new(&display));
                return Err(e);
            }
        };

        let stream = MediaStream::combine([display, audio]);
        let tracks = TrackGuard::new(&stream);

        let EncoderSession { mut chunks, stop } = self.devices.start_encoder(&stream)?;

        let collector = tokio::spawn(async move {
            let mut buffered = Vec::new();
            while let Some(chunk) = chunks.recv().await {
                if !chunk.is_empty() {
                    buffered.push(chunk);
                }
            }
            buffered
        });

        *state = ControllerState::Recording(ActiveRecording {
            _tracks: tracks,
            stop,
            collector,
            started_at: Instant::now(),
        });

        info!(tracks = stream.tracks.len(), "Recording started");
        Ok(())
    }

    /// Finish recording and persist the result under the latest-recording key.
    ///
    /// A no-op returning `Ok(None)` when not recording. Tracks are released
    /// whether or not persisting succeeds. When the cache write fails the
    /// asset is still kept in memory and the cache error is returned.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<Option<Asset>> {
        let mut state = self.state.lock().await;
        let active = match std::mem::replace(&mut *state, ControllerState::Idle) {
            ControllerState::Recording(active) => active,
            other => {
                *state = other;
                return Ok(None);
            }
        };

        let ActiveRecording {
            _tracks: tracks,
            stop,
            collector,
            started_at,
        } = active;

        stop.cancel();
        let chunks = match collector.await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!(error = %e, "Chunk collector failed");
                Vec::new()
            }
        };
        drop(tracks);

        let duration_secs = started_at.elapsed().as_secs_f64();
        let total: usize = chunks.iter().map(Bytes::len).sum();
        if total == 0 {
            warn!("Recording produced no data");
            return Err(CaptureError::Decode("Recording produced no data".to_string()));
        }

        let mut joined = BytesMut::with_capacity(total);
        for chunk in &chunks {
            joined.extend_from_slice(chunk);
        }
        let asset = Asset::captured(joined.freeze(), Some(duration_secs));

        let persisted = asset.persist_latest(self.cache.as_ref()).await;
        *state = ControllerState::Stopped(asset.clone());

        match persisted {
            Ok(()) => {
                info!(
                    asset_id = %asset.id,
                    size_bytes = asset.len(),
                    chunks = chunks.len(),
                    "Recording stopped"
                );
                Ok(Some(asset))
            }
            Err(e) => {
                error!(error = %e, asset_id = %asset.id, "Failed to persist recording");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTrack {
        kind: TrackKind,
        stopped: Arc<AtomicUsize>,
    }

    impl MediaTrack for FakeTrack {
        fn kind(&self) -> TrackKind {
            self.kind
        }
        fn stop(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeDevices {
        deny_display: bool,
        deny_audio: bool,
        chunks: Vec<&'static [u8]>,
        stopped: Arc<AtomicUsize>,
    }

    impl FakeDevices {
        fn new(chunks: Vec<&'static [u8]>) -> Self {
            Self {
                deny_display: false,
                deny_audio: false,
                chunks,
                stopped: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn track(&self, kind: TrackKind) -> MediaStream {
            MediaStream::new(vec![Arc::new(FakeTrack {
                kind,
                stopped: self.stopped.clone(),
            })])
        }
    }

    #[async_trait]
    impl MediaDevices for FakeDevices {
        async fn display_stream(&self) -> Result<MediaStream> {
            if self.deny_display {
                return Err(CaptureError::DeviceUnavailable("permission denied".into()));
            }
            Ok(self.track(TrackKind::Video))
        }

        async fn audio_stream(&self) -> Result<MediaStream> {
            if self.deny_audio {
                return Err(CaptureError::DeviceUnavailable("no microphone".into()));
            }
            Ok(self.track(TrackKind::Audio))
        }

        fn start_encoder(&self, _stream: &MediaStream) -> Result<EncoderSession> {
            let (tx, rx) = mpsc::channel(16);
            let stop = CancellationToken::new();
            let chunks: Vec<Bytes> = self.chunks.iter().map(|c| Bytes::from_static(c)).collect();
            let encoder_stop = stop.clone();
            tokio::spawn(async move {
                let (head, tail) = chunks.split_at(chunks.len() / 2);
                for chunk in head {
                    let _ = tx.send(chunk.clone()).await;
                }
                encoder_stop.cancelled().await;
                // Final flush after stop
                for chunk in tail {
                    let _ = tx.send(chunk.clone()).await;
                }
            });
            Ok(EncoderSession { chunks: rx, stop })
        }
    }

    struct FailingCache;

    #[async_trait]
    impl LocalCache for FailingCache {
        async fn put(&self, _key: &str, _value: Bytes) -> Result<()> {
            Err(CaptureError::Cache("quota exceeded".into()))
        }
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            Ok(None)
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_record_and_stop_persists_ordered_chunks() {
        let devices = Arc::new(FakeDevices::new(vec![b"ab", b"cd", b"ef", b"gh"]));
        let cache = Arc::new(MemoryCache::new());
        let controller = CaptureController::new(devices.clone(), cache.clone());

        controller.start().await.unwrap();
        assert_eq!(controller.status().await, CaptureStatus::Recording);

        let asset = controller.stop().await.unwrap().unwrap();
        assert_eq!(asset.bytes, Bytes::from_static(b"abcdefgh"));
        assert_eq!(asset.state, AssetState::Captured);
        assert!(asset.duration_secs.is_some());
        assert_eq!(controller.status().await, CaptureStatus::Stopped);
        assert_eq!(devices.stopped.load(Ordering::SeqCst), 2);

        let cached = cache.get(LATEST_RECORDING_KEY).await.unwrap().unwrap();
        assert_eq!(cached, asset.bytes);
    }

    #[tokio::test]
    async fn test_start_while_recording_is_rejected() {
        let devices = Arc::new(FakeDevices::new(vec![b"x"]));
        let controller = CaptureController::new(devices, Arc::new(MemoryCache::new()));

        controller.start().await.unwrap();
        assert!(matches!(
            controller.start().await,
            Err(CaptureError::AlreadyRecording)
        ));
        assert_eq!(controller.status().await, CaptureStatus::Recording);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let devices = Arc::new(FakeDevices::new(vec![b"x"]));
        let controller = CaptureController::new(devices, Arc::new(MemoryCache::new()));

        assert!(controller.stop().await.unwrap().is_none());
        assert_eq!(controller.status().await, CaptureStatus::Idle);
    }

    #[tokio::test]
    async fn test_denied_audio_releases_display_and_returns_to_idle() {
        let mut devices = FakeDevices::new(vec![b"x"]);
        devices.deny_audio = true;
        let devices = Arc::new(devices);
        let controller = CaptureController::new(devices.clone(), Arc::new(MemoryCache::new()));

        assert!(matches!(
            controller.start().await,
            Err(CaptureError::DeviceUnavailable(_))
        ));
        assert_eq!(controller.status().await, CaptureStatus::Idle);
        assert_eq!(devices.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_denied_display_acquires_nothing() {
        let mut devices = FakeDevices::new(vec![b"x"]);
        devices.deny_display = true;
        let devices = Arc::new(devices);
        let controller = CaptureController::new(devices.clone(), Arc::new(MemoryCache::new()));

        assert!(controller.start().await.is_err());
        assert_eq!(controller.status().await, CaptureStatus::Idle);
        assert_eq!(devices.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_failure_still_releases_tracks_and_keeps_asset() {
        let devices = Arc::new(FakeDevices::new(vec![b"ab", b"cd"]));
        let controller = CaptureController::new(devices.clone(), Arc::new(FailingCache));

        controller.start().await.unwrap();
        assert!(matches!(controller.stop().await, Err(CaptureError::Cache(_))));
        assert_eq!(devices.stopped.load(Ordering::SeqCst), 2);
        assert_eq!(controller.status().await, CaptureStatus::Stopped);
        assert_eq!(
            controller.asset().await.unwrap().bytes,
            Bytes::from_static(b"abcd")
        );
    }

    #[tokio::test]
    async fn test_new_start_discards_previous_asset() {
        let devices = Arc::new(FakeDevices::new(vec![b"ab", b"cd"]));
        let controller = CaptureController::new(devices, Arc::new(MemoryCache::new()));

        controller.start().await.unwrap();
        controller.stop().await.unwrap();
        assert!(controller.asset().await.is_some());

        controller.start().await.unwrap();
        assert!(controller.asset().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_recording_is_a_failure() {
        let devices = Arc::new(FakeDevices::new(vec![]));
        let cache = Arc::new(MemoryCache::new());
        let controller = CaptureController::new(devices.clone(), cache.clone());

        controller.start().await.unwrap();
        assert!(matches!(controller.stop().await, Err(CaptureError::Decode(_))));
        assert_eq!(controller.status().await, CaptureStatus::Idle);
        assert_eq!(devices.stopped.load(Ordering::SeqCst), 2);
        assert!(cache.get(LATEST_RECORDING_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_latest_reads_persisted_recording() {
        let cache = MemoryCache::new();
        assert!(Asset::load_latest(&cache).await.unwrap().is_none());

        cache
            .put(LATEST_RECORDING_KEY, Bytes::from_static(b"saved"))
            .await
            .unwrap();
        let asset = Asset::load_latest(&cache).await.unwrap().unwrap();
        assert_eq!(asset.bytes, Bytes::from_static(b"saved"));
        assert_eq!(asset.content_type, RECORDING_CONTENT_TYPE);
        assert_eq!(asset.duration_secs, None);
    }

    #[tokio::test]
    async fn test_stop_persists_duration_for_reload() {
        let devices = Arc::new(FakeDevices::new(vec![b"ab", b"cd"]));
        let cache = Arc::new(MemoryCache::new());
        let controller = CaptureController::new(devices, cache.clone());

        controller.start().await.unwrap();
        let asset = controller.stop().await.unwrap().unwrap();

        let reloaded = Asset::load_latest(cache.as_ref()).await.unwrap().unwrap();
        assert_eq!(reloaded.bytes, asset.bytes);
        assert_eq!(reloaded.duration_secs, asset.duration_secs);
    }

    #[tokio::test]
    async fn test_persist_without_duration_drops_stale_value() {
        let cache = MemoryCache::new();
        Asset::captured(Bytes::from_static(b"old"), Some(42.0))
            .persist_latest(&cache)
            .await
            .unwrap();
        Asset::captured(Bytes::from_static(b"new"), None)
            .persist_latest(&cache)
            .await
            .unwrap();

        let reloaded = Asset::load_latest(&cache).await.unwrap().unwrap();
        assert_eq!(reloaded.bytes, Bytes::from_static(b"new"));
        assert_eq!(reloaded.duration_secs, None);
    }
}
