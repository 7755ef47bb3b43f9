use crate::client::{AnalyticsClient, WatchAck};
use crate::error::{CaptureError, Result};
use crate::playback::{PlaybackEvent, WatchStateMachine};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Result of mounting a playback page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOutcome {
    /// This mount counted the view; carries the server's new total
    Counted(u64),
    /// The view was already counted earlier in this session
    AlreadyCounted,
}

struct Mount {
    video_id: String,
    token: CancellationToken,
}

/// One browsing session's view tracking.
///
/// At most one view per recording id is counted per session. The dedup flag
/// is set only after the server confirms the increment, so a failed call can
/// be retried. Mounting a different recording cancels the in-flight request
/// of the previous one.
pub struct BrowsingSession {
    client: Arc<dyn AnalyticsClient>,
    viewed: AsyncMutex<HashSet<String>>,
    current: Mutex<Option<Mount>>,
}

impl BrowsingSession {
    pub fn new(client: Arc<dyn AnalyticsClient>) -> Self {
        Self {
            client,
            viewed: AsyncMutex::new(HashSet::new()),
            current: Mutex::new(None),
        }
    }

    /// Track the view for `video_id` unless this session already has.
    ///
    /// Returns `Err(CaptureError::Cancelled)` when a later mount or
    /// [`unmount`](Self::unmount) superseded this one.
    #[instrument(skip(self))]
    pub async fn mount(&self, video_id: &str) -> Result<ViewOutcome> {
        let token = self.claim(video_id);

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(video_id, "View tracking superseded");
                Err(CaptureError::Cancelled)
            }
            outcome = self.track_once(video_id) => outcome,
        }
    }

    /// Cancel whatever request the current mount has in flight
    pub fn unmount(&self) {
        if let Some(mount) = self.current.lock().take() {
            mount.token.cancel();
        }
    }

    pub async fn has_viewed(&self, video_id: &str) -> bool {
        self.viewed.lock().await.contains(video_id)
    }

    /// Same-id mounts share a token; a new id cancels the previous one
    fn claim(&self, video_id: &str) -> CancellationToken {
        let mut current = self.current.lock();
        if let Some(mount) = current.as_ref() {
            if mount.video_id == video_id && !mount.token.is_cancelled() {
                return mount.token.clone();
            }
        }
        if let Some(previous) = current.take() {
            previous.token.cancel();
        }
        let token = CancellationToken::new();
        *current = Some(Mount {
            video_id: video_id.to_string(),
            token: token.clone(),
        });
        token
    }

    async fn track_once(&self, video_id: &str) -> Result<ViewOutcome> {
        // Held across the request so concurrent mounts observe the flag.
        let mut viewed = self.viewed.lock().await;
        if viewed.contains(video_id) {
            return Ok(ViewOutcome::AlreadyCounted);
        }

        let views = self.client.track_view(video_id).await.map_err(|e| {
            warn!(error = %e, video_id, "Failed to track view");
            e
        })?;
        viewed.insert(video_id.to_string());
        Ok(ViewOutcome::Counted(views))
    }
}

/// Sends watch samples for one recording.
///
/// Events are evaluated one at a time; the tracked cursor advances only after
/// the server accepts a sample, so overlapping pause and tick handlers never
/// report the same progress twice.
pub struct WatchTracker {
    client: Arc<dyn AnalyticsClient>,
    video_id: String,
    machine: AsyncMutex<WatchStateMachine>,
}

impl WatchTracker {
    pub fn new(
        client: Arc<dyn AnalyticsClient>,
        video_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            video_id: video_id.into(),
            machine: AsyncMutex::new(WatchStateMachine::new(interval)),
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// Apply one event, sending a sample when the event produces one
    pub async fn handle(&self, event: PlaybackEvent) -> Result<Option<WatchAck>> {
        let mut machine = self.machine.lock().await;
        let Some(sample) = machine.on_event(event) else {
            return Ok(None);
        };

        let ack = self
            .client
            .track_watch(&self.video_id, sample.watched, sample.duration)
            .await?;
        machine.commit(&sample);
        Ok(Some(ack))
    }

    /// Drain player events until the channel closes or `cancel` fires.
    /// Failed samples are logged and left uncommitted for the next event.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<PlaybackEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let handled = tokio::select! {
                        _ = cancel.cancelled() => break,
                        handled = self.handle(event) => handled,
                    };
                    if let Err(e) = handled {
                        warn!(error = %e, video_id = %self.video_id, "Failed to track watch sample");
                    }
                }
            }
        }
        debug!(video_id = %self.video_id, "Watch tracking stopped");
    }
}
