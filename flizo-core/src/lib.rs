//! Flizo Copilot Core Library
//!
//! This crate provides the trip history data model, the route normalizer,
//! the playback clock and the trait every tracking API backend implements.

pub mod address;
pub mod api;
pub mod error;
pub mod model;
pub mod normalize;
pub mod playback;
pub mod push;
pub mod session;
pub mod units;

pub use api::TrackingApi;
pub use error::{ApiError, ValidationError};
pub use model::{Device, DeviceStatus, HistoryData, HistoryQuery, RoutePath, TripPoint, TripPointGroup};
pub use playback::{PlaybackClock, PlaybackEvent, PlaybackState, SpeedMultiplier};
pub use session::Session;
