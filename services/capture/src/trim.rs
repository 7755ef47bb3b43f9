use crate::capture::{Asset, AssetState};
use crate::error::{CaptureError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Half-open range `[start, end)` in seconds, validated against a source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimRange {
    start: f64,
    end: f64,
}

impl TrimRange {
    /// Requires `0 <= start < end <= source_duration`
    pub fn new(start: f64, end: f64, source_duration: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() || !source_duration.is_finite() {
            return Err(CaptureError::Validation(
                "Trim bounds must be finite numbers".to_string(),
            ));
        }
        if start < 0.0 {
            return Err(CaptureError::Validation(
                "Start time must not be negative".to_string(),
            ));
        }
        if start >= end {
            return Err(CaptureError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }
        if end > source_duration {
            return Err(CaptureError::Validation(
                "End time exceeds video duration".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// External engine that cuts a time range out of a container without
/// re-encoding
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// One-time initialisation
    async fn load(&self) -> Result<()>;

    /// Stream-copy `range` out of `input`. May return empty output when the
    /// range cannot be cut.
    async fn cut(&self, input: Bytes, range: TrimRange) -> Result<Bytes>;
}

/// Transcoder backed by the ffmpeg command line
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn load(&self) -> Result<()> {
        let status = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                CaptureError::Transcoder(format!(
                    "failed to start {}: {e}",
                    self.binary.display()
                ))
            })?;

        if !status.success() {
            return Err(CaptureError::Transcoder(format!(
                "{} -version exited with {status}",
                self.binary.display()
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, input), fields(size_bytes = input.len()))]
    async fn cut(&self, input: Bytes, range: TrimRange) -> Result<Bytes> {
        let workdir = tempfile::tempdir()
            .map_err(|e| CaptureError::Transcoder(format!("failed to create work dir: {e}")))?;
        let input_path = workdir.path().join("input.webm");
        let output_path = workdir.path().join("output.webm");

        tokio::fs::write(&input_path, &input)
            .await
            .map_err(|e| CaptureError::Transcoder(format!("failed to stage input: {e}")))?;

        let output = Command::new(&self.binary)
            .arg("-y")
            .arg("-i")
            .arg(&input_path)
            .arg("-ss")
            .arg(range.start().to_string())
            .arg("-to")
            .arg(range.end().to_string())
            .args(["-c", "copy"])
            .arg(&output_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CaptureError::Transcoder(format!("failed to run ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Transcoder(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            )));
        }

        match tokio::fs::read(&output_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Bytes::new()),
            Err(e) => Err(CaptureError::Transcoder(format!(
                "failed to read ffmpeg output: {e}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

/// Cuts sub-ranges out of recordings.
///
/// The transcoder is loaded once in the background on first use; requests
/// made before loading finishes fail with `NotReady` instead of queuing.
pub struct TrimOperator {
    transcoder: Arc<dyn Transcoder>,
    load_state: Arc<watch::Sender<LoadState>>,
}

impl TrimOperator {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        let (load_state, _) = watch::channel(LoadState::Unloaded);
        Self {
            transcoder,
            load_state: Arc::new(load_state),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.load_state.borrow() == LoadState::Ready
    }

    /// Begin loading in the background. Retries a failed load.
    pub fn prepare(&self) {
        let mut begin = false;
        self.load_state.send_if_modified(|state| {
            if matches!(state, LoadState::Unloaded | LoadState::Failed(_)) {
                *state = LoadState::Loading;
                begin = true;
                true
            } else {
                false
            }
        });

        if begin {
            let transcoder = self.transcoder.clone();
            let load_state = self.load_state.clone();
            tokio::spawn(async move {
                let next = match transcoder.load().await {
                    Ok(()) => {
                        info!("Transcoder loaded");
                        LoadState::Ready
                    }
                    Err(e) => {
                        error!(error = %e, "Transcoder failed to load");
                        LoadState::Failed(e.to_string())
                    }
                };
                load_state.send_replace(next);
            });
        }
    }

    /// Wait until loading has finished, successfully or not
    pub async fn ready(&self) -> Result<()> {
        self.prepare();
        let mut receiver = self.load_state.subscribe();
        let state = receiver
            .wait_for(|s| matches!(s, LoadState::Ready | LoadState::Failed(_)))
            .await
            .map_err(|_| CaptureError::Cancelled)?
            .clone();
        match state {
            LoadState::Failed(message) => Err(CaptureError::Transcoder(message)),
            _ => Ok(()),
        }
    }

    /// Produce a new asset holding exactly `[start, end)` of `source`
    #[instrument(skip(self, source), fields(source_id = %source.id))]
    pub async fn trim(&self, source: &Asset, start: f64, end: f64) -> Result<Asset> {
        let source_duration = source.duration_secs.ok_or_else(|| {
            CaptureError::Validation("Source duration is unknown".to_string())
        })?;
        let range = TrimRange::new(start, end, source_duration)?;

        let state = self.load_state.borrow().clone();
        match state {
            LoadState::Ready => {}
            LoadState::Failed(message) => return Err(CaptureError::Transcoder(message)),
            LoadState::Unloaded => {
                self.prepare();
                return Err(CaptureError::NotReady);
            }
            LoadState::Loading => return Err(CaptureError::NotReady),
        }

        let output = self.transcoder.cut(source.bytes.clone(), range).await?;
        if output.is_empty() {
            return Err(CaptureError::Decode("Trimmed video is empty".to_string()));
        }

        debug!(
            start = range.start(),
            end = range.end(),
            size_bytes = output.len(),
            "Recording trimmed"
        );

        Ok(Asset {
            id: Uuid::new_v4(),
            bytes: output,
            content_type: source.content_type.clone(),
            state: AssetState::Trimmed,
            duration_secs: Some(range.duration()),
        })
    }
}
