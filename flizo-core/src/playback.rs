//! Playback clock for trip history
//!
//! Pure state machine over a [`RoutePath`]: the clock never sleeps or spawns
//! anything itself. Whoever owns the timer calls [`PlaybackClock::tick`] every
//! [`PlaybackClock::frame_interval`] and forwards the returned events to the
//! map renderer.

use crate::model::{RoutePath, RoutePoint};
use crate::units::Percent;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wall-clock length of a full playback at 1x
pub const DEFAULT_PLAYBACK_DURATION: Duration = Duration::from_secs(60);

/// User-selectable playback speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SpeedMultiplier {
    #[default]
    X1,
    X2,
    X3,
}

impl SpeedMultiplier {
    pub fn factor(&self) -> u32 {
        match self {
            SpeedMultiplier::X1 => 1,
            SpeedMultiplier::X2 => 2,
            SpeedMultiplier::X3 => 3,
        }
    }

    /// Cycle 1 -> 2 -> 3 -> 1, as the speed button does
    pub fn next(&self) -> Self {
        match self {
            SpeedMultiplier::X1 => SpeedMultiplier::X2,
            SpeedMultiplier::X2 => SpeedMultiplier::X3,
            SpeedMultiplier::X3 => SpeedMultiplier::X1,
        }
    }
}

impl TryFrom<u8> for SpeedMultiplier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SpeedMultiplier::X1),
            2 => Ok(SpeedMultiplier::X2),
            3 => Ok(SpeedMultiplier::X3),
            other => Err(format!("unsupported playback speed {other}, expected 1, 2 or 3")),
        }
    }
}

impl From<SpeedMultiplier> for u8 {
    fn from(speed: SpeedMultiplier) -> u8 {
        speed.factor() as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

/// Serializable snapshot of the transport controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub is_playing: bool,
    pub speed_multiplier: SpeedMultiplier,
    pub progress_percent: Percent,
    pub current_index: usize,
    pub frame_count: usize,
    pub can_play: bool,
}

/// Something the renderer or progress UI should react to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// Re-center the map on this frame and move the progress control
    Frame {
        index: usize,
        latitude: f64,
        longitude: f64,
        progress_percent: Percent,
    },
    Playing { index: usize },
    Paused { index: usize },
    Stopped,
    /// The last frame was reached; the clock is back at frame 0
    Finished,
    SpeedChanged { speed: SpeedMultiplier },
}

pub struct PlaybackClock {
    route: RoutePath,
    status: PlaybackStatus,
    speed: SpeedMultiplier,
    current_index: usize,
    total_duration: Duration,
}

impl PlaybackClock {
    pub fn new(route: RoutePath) -> Self {
        Self::with_duration(route, DEFAULT_PLAYBACK_DURATION)
    }

    pub fn with_duration(route: RoutePath, total_duration: Duration) -> Self {
        Self {
            route,
            status: PlaybackStatus::Stopped,
            speed: SpeedMultiplier::X1,
            current_index: 0,
            total_duration,
        }
    }

    pub fn route(&self) -> &RoutePath {
        &self.route
    }

    pub fn len(&self) -> usize {
        self.route.len()
    }

    pub fn is_empty(&self) -> bool {
        self.route.is_empty()
    }

    /// Play is only enabled with at least two distinct frames
    pub fn can_play(&self) -> bool {
        self.route.len() > 1
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn speed(&self) -> SpeedMultiplier {
        self.speed
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_point(&self) -> Option<&RoutePoint> {
        self.route.get(self.current_index)
    }

    pub fn progress_percent(&self) -> Percent {
        if self.route.len() <= 1 {
            return Percent(0.0);
        }
        Percent::new(self.current_index as f64 / (self.route.len() - 1) as f64 * 100.0)
    }

    /// Time between two ticks at the current speed
    pub fn frame_interval(&self) -> Duration {
        let frames = self.route.len().max(1) as f64;
        self.total_duration
            .div_f64(frames * self.speed.factor() as f64)
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            status: self.status,
            is_playing: self.is_playing(),
            speed_multiplier: self.speed,
            progress_percent: self.progress_percent(),
            current_index: self.current_index,
            frame_count: self.route.len(),
            can_play: self.can_play(),
        }
    }

    pub fn play(&mut self) -> Option<PlaybackEvent> {
        if !self.can_play() || self.is_playing() {
            return None;
        }
        self.status = PlaybackStatus::Playing;
        Some(PlaybackEvent::Playing {
            index: self.current_index,
        })
    }

    pub fn pause(&mut self) -> Option<PlaybackEvent> {
        if !self.is_playing() {
            return None;
        }
        self.status = PlaybackStatus::Paused;
        Some(PlaybackEvent::Paused {
            index: self.current_index,
        })
    }

    /// The play/pause button
    pub fn toggle(&mut self) -> Option<PlaybackEvent> {
        if self.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Back to frame 0 from any state
    pub fn stop(&mut self) -> PlaybackEvent {
        self.status = PlaybackStatus::Stopped;
        self.current_index = 0;
        PlaybackEvent::Stopped
    }

    pub fn set_speed(&mut self, speed: SpeedMultiplier) -> Option<PlaybackEvent> {
        if self.speed == speed {
            return None;
        }
        self.speed = speed;
        Some(PlaybackEvent::SpeedChanged { speed })
    }

    /// Dragging the progress control. Always leaves the clock paused.
    pub fn seek_percent(&mut self, percent: f64) -> Option<PlaybackEvent> {
        if !self.can_play() {
            return None;
        }
        let percent = Percent::new(percent);
        let last = self.route.len() - 1;
        let index = ((last as f64) * percent.0 / 100.0).floor() as usize;
        self.current_index = index.min(last);
        self.status = PlaybackStatus::Paused;
        self.frame_event()
    }

    /// Advance one frame. Returns `None` unless playing.
    pub fn tick(&mut self) -> Option<PlaybackEvent> {
        if !self.is_playing() {
            return None;
        }

        let last = self.route.len().saturating_sub(1);
        if self.current_index >= last {
            self.status = PlaybackStatus::Stopped;
            self.current_index = 0;
            return Some(PlaybackEvent::Finished);
        }

        self.current_index += 1;
        self.frame_event()
    }

    fn frame_event(&self) -> Option<PlaybackEvent> {
        let point = self.current_point()?;
        Some(PlaybackEvent::Frame {
            index: self.current_index,
            latitude: point.latitude,
            longitude: point.longitude,
            progress_percent: self.progress_percent(),
        })
    }
}
