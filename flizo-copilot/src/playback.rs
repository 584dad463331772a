//! Playback timer and transport controls
//!
//! The clock itself lives in the history view; this module owns the one
//! background task that ticks it and turns control requests into clock
//! transitions.

use crate::history::HistoryView;
use crate::state::AppState;
use flizo_core::{PlaybackEvent, PlaybackState, SpeedMultiplier};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Background task that ticks the view's clock at its frame interval
///
/// Dropping or cancelling the timer ends the task. It also ends by itself on
/// `Finished`, when the clock leaves `Playing`, or when the view it was
/// started for is replaced.
pub struct PlaybackTimer {
    generation: u64,
    cancel: CancellationToken,
    reschedule: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl PlaybackTimer {
    pub fn start(
        view: Arc<RwLock<Option<HistoryView>>>,
        tx: broadcast::Sender<PlaybackEvent>,
        generation: u64,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let reschedule = Arc::new(Notify::new());
        let wake = reschedule.clone();

        let handle = tokio::spawn(async move {
            debug!("Playback timer started for generation {}", generation);
            let mut last_tick = Instant::now();

            loop {
                let interval = {
                    let view = view.read().await;
                    match &*view {
                        Some(v) if v.generation == generation && v.clock.is_playing() => {
                            v.clock.frame_interval()
                        }
                        _ => break,
                    }
                };

                // The deadline counts from the last tick, so a new interval
                // applies to the tick already being waited for
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = wake.notified() => continue,
                    _ = tokio::time::sleep_until(last_tick + interval) => {},
                }
                last_tick = Instant::now();

                let event = {
                    let mut view = view.write().await;
                    if token.is_cancelled() {
                        break;
                    }
                    match view.as_mut() {
                        Some(v) if v.generation == generation => v.clock.tick(),
                        _ => break,
                    }
                };

                match event {
                    Some(PlaybackEvent::Finished) => {
                        let _ = tx.send(PlaybackEvent::Finished);
                        info!("Playback finished");
                        break;
                    }
                    Some(event) => {
                        let _ = tx.send(event);
                    }
                    None => break,
                }
            }

            debug!("Playback timer ended for generation {}", generation);
        });

        Self {
            generation,
            cancel,
            reschedule,
            handle,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Re-read the frame interval without waiting out the current one
    pub fn reschedule(&self) {
        self.reschedule.notify_one();
    }

    /// Still ticking the view of `generation`
    pub fn is_running_for(&self, generation: u64) -> bool {
        self.generation == generation && !self.handle.is_finished()
    }
}

impl Drop for PlaybackTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One press on the transport controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackAction {
    Play,
    Pause,
    Toggle,
    Stop,
    /// Set a speed, or cycle to the next one when `None`
    Speed(Option<SpeedMultiplier>),
    /// Jump to a position given as percent of the route
    Seek(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("No active history view")]
    NoView,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Missing 'value' for {0}")]
    MissingValue(&'static str),

    #[error("{0}")]
    InvalidValue(String),
}

impl PlaybackAction {
    /// Parse the `{action, value}` pair of a control request
    pub fn parse(action: &str, value: Option<f64>) -> Result<Self, ControlError> {
        match action {
            "play" => Ok(PlaybackAction::Play),
            "pause" => Ok(PlaybackAction::Pause),
            "toggle" => Ok(PlaybackAction::Toggle),
            "stop" => Ok(PlaybackAction::Stop),
            "speed" => match value {
                None => Ok(PlaybackAction::Speed(None)),
                Some(v) if v.fract() == 0.0 && (1.0..=3.0).contains(&v) => {
                    SpeedMultiplier::try_from(v as u8)
                        .map(|s| PlaybackAction::Speed(Some(s)))
                        .map_err(ControlError::InvalidValue)
                }
                Some(v) => Err(ControlError::InvalidValue(format!(
                    "unsupported playback speed {v}, expected 1, 2 or 3"
                ))),
            },
            "seek" => match value {
                Some(v) if v.is_finite() => Ok(PlaybackAction::Seek(v)),
                Some(v) => Err(ControlError::InvalidValue(format!("invalid seek position {v}"))),
                None => Err(ControlError::MissingValue("seek")),
            },
            other => Err(ControlError::UnknownAction(other.to_string())),
        }
    }
}

/// Apply an action to the open view's clock and manage the timer to match
pub async fn control(state: &AppState, action: PlaybackAction) -> Result<PlaybackState, ControlError> {
    let (event, generation, snapshot) = {
        let mut view = state.view.write().await;
        let v = view.as_mut().ok_or(ControlError::NoView)?;
        let event = match action {
            PlaybackAction::Play => v.clock.play(),
            PlaybackAction::Pause => v.clock.pause(),
            PlaybackAction::Toggle => v.clock.toggle(),
            PlaybackAction::Stop => Some(v.clock.stop()),
            PlaybackAction::Speed(speed) => {
                let speed = speed.unwrap_or_else(|| v.clock.speed().next());
                v.clock.set_speed(speed)
            }
            PlaybackAction::Seek(percent) => v.clock.seek_percent(percent),
        };
        (event, v.generation, v.clock.state())
    };

    if let Some(event) = event {
        state.emit(event);
    }

    if snapshot.is_playing {
        // A running timer keeps its position; a speed change only moves its deadline
        let running = {
            let timer = state.timer.lock().await;
            match timer.as_ref() {
                Some(t) if t.is_running_for(generation) => {
                    if matches!(action, PlaybackAction::Speed(_)) {
                        t.reschedule();
                    }
                    true
                }
                _ => false,
            }
        };
        if !running {
            state.start_timer(generation).await;
        }
    } else {
        state.stop_timer().await;
    }

    debug!("Playback {:?} -> {:?}", action, snapshot.status);
    Ok(snapshot)
}

/// Snapshot of the open view's clock
pub async fn current_state(state: &AppState) -> Result<PlaybackState, ControlError> {
    let view = state.view.read().await;
    view.as_ref()
        .map(|v| v.clock.state())
        .ok_or(ControlError::NoView)
}
