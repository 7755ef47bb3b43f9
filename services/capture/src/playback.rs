//! Playback state machine that turns player events into watch samples.
//!
//! Each emitted [`WatchSample`] carries the cumulative playback position and
//! the media duration. The machine never produces deltas. The "last tracked"
//! cursor is re-anchored to the playhead on every `Play`, so replays and
//! backward seeks are tracked again, and otherwise only moves when the caller
//! commits a sample after the server has accepted it.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Ended,
}

/// Discrete player events. Positions and durations are in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    Play { position: f64 },
    Pause { position: f64, duration: f64 },
    Ended { duration: f64 },
    /// Periodic clock tick; `elapsed` is the time since the previous tick.
    /// The first tick after `Play` counts at most the distance the playhead
    /// moved since resuming.
    Tick {
        position: f64,
        duration: f64,
        elapsed: Duration,
    },
}

/// A complete watch sample to send as-is
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchSample {
    pub watched: f64,
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub struct WatchStateMachine {
    state: PlaybackState,
    last_tracked: f64,
    /// Cursor in effect when the outstanding, uncommitted sample was emitted
    pending_from: Option<f64>,
    resumed_at: Option<f64>,
    active_playback: Duration,
    interval: Duration,
}

impl WatchStateMachine {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: PlaybackState::Idle,
            last_tracked: 0.0,
            pending_from: None,
            resumed_at: None,
            active_playback: Duration::ZERO,
            interval,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn last_tracked(&self) -> f64 {
        self.last_tracked
    }

    /// Apply one event, yielding at most one sample to send
    pub fn on_event(&mut self, event: PlaybackEvent) -> Option<WatchSample> {
        match event {
            PlaybackEvent::Play { position } => {
                self.state = PlaybackState::Playing;
                if position.is_finite() && position >= 0.0 {
                    // An unacknowledged segment starting at or before the
                    // playhead is still owed to the server.
                    self.last_tracked = match self.pending_from.take() {
                        Some(from) if from <= position => from,
                        _ => position,
                    };
                    self.resumed_at = Some(position);
                }
                None
            }
            PlaybackEvent::Pause { position, duration } => {
                if self.state != PlaybackState::Playing {
                    return None;
                }
                self.state = PlaybackState::Paused;
                self.resumed_at = None;
                self.sample_if_advanced(position, duration)
            }
            PlaybackEvent::Ended { duration } => {
                self.state = PlaybackState::Ended;
                self.resumed_at = None;
                self.active_playback = Duration::ZERO;
                if !duration.is_finite() || duration <= 0.0 {
                    return None;
                }
                self.emit(duration, duration)
            }
            PlaybackEvent::Tick {
                position,
                duration,
                elapsed,
            } => {
                if self.state != PlaybackState::Playing {
                    return None;
                }
                let elapsed = match self.resumed_at.take() {
                    Some(start) => {
                        let moved = Duration::try_from_secs_f64(position - start)
                            .unwrap_or(Duration::ZERO);
                        elapsed.min(moved)
                    }
                    None => elapsed,
                };
                self.active_playback += elapsed;
                if self.active_playback < self.interval {
                    return None;
                }
                self.active_playback = Duration::ZERO;
                self.sample_if_advanced(position, duration)
            }
        }
    }

    /// Record that `sample` was accepted by the server
    pub fn commit(&mut self, sample: &WatchSample) {
        self.last_tracked = sample.watched;
        self.pending_from = None;
    }

    fn sample_if_advanced(&mut self, position: f64, duration: f64) -> Option<WatchSample> {
        if !position.is_finite() || !duration.is_finite() || duration < 0.0 {
            return None;
        }
        if position - self.last_tracked <= 0.0 {
            return None;
        }
        self.emit(position, duration)
    }

    fn emit(&mut self, watched: f64, duration: f64) -> Option<WatchSample> {
        self.pending_from = Some(self.last_tracked);
        Some(WatchSample { watched, duration })
    }
}

/// Why playback of a recording failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackFailure {
    /// The media could not be fetched, including cross-origin rejections
    Network,
    Decode,
    UnsupportedFormat,
}

impl PlaybackFailure {
    /// Classify a media element error code. Aborted playback (1) and
    /// unknown codes are not failures.
    pub fn from_media_error_code(code: u16) -> Option<Self> {
        match code {
            2 => Some(PlaybackFailure::Network),
            3 => Some(PlaybackFailure::Decode),
            4 => Some(PlaybackFailure::UnsupportedFormat),
            _ => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PlaybackFailure::Network => "The video could not be downloaded",
            PlaybackFailure::Decode => "The video could not be decoded",
            PlaybackFailure::UnsupportedFormat => "The video format is not supported",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            PlaybackFailure::Network => {
                "Check your connection and that the bucket allows cross-origin requests from this site, then refresh the page"
            }
            PlaybackFailure::Decode => {
                "The file may be corrupted; try recording or trimming it again"
            }
            PlaybackFailure::UnsupportedFormat => {
                "Open the video in a browser that plays WebM, or download it instead"
            }
        }
    }
}

impl std::fmt::Display for PlaybackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}. {}", self.message(), self.hint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(5);

    fn tick(position: f64, secs: u64) -> PlaybackEvent {
        PlaybackEvent::Tick {
            position,
            duration: 30.0,
            elapsed: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_pause_emits_cumulative_position() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        assert_eq!(machine.on_event(PlaybackEvent::Play { position: 0.0 }), None);

        let sample = machine
            .on_event(PlaybackEvent::Pause {
                position: 7.5,
                duration: 30.0,
            })
            .unwrap();
        assert_eq!(sample, WatchSample { watched: 7.5, duration: 30.0 });
        assert_eq!(machine.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_pause_without_progress_is_suppressed() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        let sample = machine
            .on_event(PlaybackEvent::Pause {
                position: 4.0,
                duration: 30.0,
            })
            .unwrap();
        machine.commit(&sample);

        machine.on_event(PlaybackEvent::Play { position: 4.0 });
        assert_eq!(
            machine.on_event(PlaybackEvent::Pause {
                position: 4.0,
                duration: 30.0
            }),
            None
        );
    }

    #[test]
    fn test_uncommitted_sample_is_retried() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        machine.on_event(PlaybackEvent::Pause {
            position: 3.0,
            duration: 30.0,
        });

        // The request failed, so nothing was committed.
        machine.on_event(PlaybackEvent::Play { position: 3.0 });
        let retry = machine.on_event(PlaybackEvent::Pause {
            position: 3.0,
            duration: 30.0,
        });
        assert_eq!(retry, Some(WatchSample { watched: 3.0, duration: 30.0 }));
    }

    #[test]
    fn test_ticks_sample_every_interval_of_active_playback() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });

        for second in 1..5 {
            assert_eq!(machine.on_event(tick(second as f64, 1)), None);
        }
        let sample = machine.on_event(tick(5.0, 1)).unwrap();
        assert_eq!(sample.watched, 5.0);
        machine.commit(&sample);

        assert_eq!(machine.on_event(tick(6.0, 1)), None);
    }

    #[test]
    fn test_ticks_while_paused_do_not_count() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        machine.on_event(tick(3.0, 3));
        let paused = machine
            .on_event(PlaybackEvent::Pause {
                position: 3.0,
                duration: 30.0,
            })
            .unwrap();
        machine.commit(&paused);

        assert_eq!(machine.on_event(tick(3.0, 60)), None);

        machine.on_event(PlaybackEvent::Play { position: 3.0 });
        // 3s accumulated before the pause plus 2s after resuming
        let sample = machine.on_event(tick(5.0, 2)).unwrap();
        assert_eq!(sample.watched, 5.0);
    }

    #[test]
    fn test_ended_reports_full_duration() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        let sample = machine
            .on_event(PlaybackEvent::Ended { duration: 12.0 })
            .unwrap();
        assert_eq!(sample, WatchSample { watched: 12.0, duration: 12.0 });
        machine.commit(&sample);
        assert_eq!(machine.state(), PlaybackState::Ended);
        assert_eq!(machine.last_tracked(), 12.0);

        // Reaching the end again always reports the final position
        let again = machine.on_event(PlaybackEvent::Ended { duration: 12.0 });
        assert_eq!(again, Some(WatchSample { watched: 12.0, duration: 12.0 }));
    }

    #[test]
    fn test_ended_without_duration_is_suppressed() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        assert_eq!(machine.on_event(PlaybackEvent::Ended { duration: 0.0 }), None);
        assert_eq!(
            machine.on_event(PlaybackEvent::Ended {
                duration: f64::INFINITY
            }),
            None
        );
    }

    #[test]
    fn test_replay_after_end_is_tracked() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        let first = machine
            .on_event(PlaybackEvent::Ended { duration: 10.0 })
            .unwrap();
        machine.commit(&first);

        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        assert_eq!(machine.last_tracked(), 0.0);
        let paused = machine
            .on_event(PlaybackEvent::Pause {
                position: 6.0,
                duration: 10.0,
            })
            .unwrap();
        assert_eq!(paused, WatchSample { watched: 6.0, duration: 10.0 });
        machine.commit(&paused);

        machine.on_event(PlaybackEvent::Play { position: 6.0 });
        let ended = machine.on_event(PlaybackEvent::Ended { duration: 10.0 });
        assert_eq!(ended, Some(WatchSample { watched: 10.0, duration: 10.0 }));
    }

    #[test]
    fn test_seek_back_then_pause_is_tracked() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        let sample = machine
            .on_event(PlaybackEvent::Pause {
                position: 20.0,
                duration: 30.0,
            })
            .unwrap();
        machine.commit(&sample);

        machine.on_event(PlaybackEvent::Play { position: 2.0 });
        let sample = machine.on_event(PlaybackEvent::Pause {
            position: 15.0,
            duration: 30.0,
        });
        assert_eq!(sample, Some(WatchSample { watched: 15.0, duration: 30.0 }));
    }

    #[test]
    fn test_first_tick_after_resume_ignores_paused_time() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        machine.on_event(tick(4.0, 4));
        let paused = machine
            .on_event(PlaybackEvent::Pause {
                position: 4.0,
                duration: 30.0,
            })
            .unwrap();
        machine.commit(&paused);

        // The tick clock kept running through a long pause
        machine.on_event(PlaybackEvent::Play { position: 4.0 });
        assert_eq!(machine.on_event(tick(4.5, 60)), None);

        let sample = machine.on_event(tick(5.0, 1)).unwrap();
        assert_eq!(sample.watched, 5.0);
    }

    #[test]
    fn test_unknown_duration_is_suppressed() {
        let mut machine = WatchStateMachine::new(INTERVAL);
        machine.on_event(PlaybackEvent::Play { position: 0.0 });
        assert_eq!(
            machine.on_event(PlaybackEvent::Pause {
                position: 2.0,
                duration: f64::NAN
            }),
            None
        );
    }

    #[test]
    fn test_media_error_classification() {
        assert_eq!(PlaybackFailure::from_media_error_code(1), None);
        assert_eq!(
            PlaybackFailure::from_media_error_code(2),
            Some(PlaybackFailure::Network)
        );
        assert_eq!(
            PlaybackFailure::from_media_error_code(3),
            Some(PlaybackFailure::Decode)
        );
        assert_eq!(
            PlaybackFailure::from_media_error_code(4),
            Some(PlaybackFailure::UnsupportedFormat)
        );
        assert!(PlaybackFailure::Network.hint().contains("cross-origin"));
    }
}
