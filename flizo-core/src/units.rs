//! Type-safe wrappers for the units the tracking service reports
//!
//! All unit types serialize with 4 decimal places to reduce JSON payload size.

use serde::{Deserialize, Serialize};

/// Round f64 to 4 decimal places for compact JSON serialization
fn round4<S: serde::Serializer>(val: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((*val * 10000.0).round() / 10000.0)
}

/// Kilometers
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Kilometers(#[serde(serialize_with = "round4")] pub f64);

impl Kilometers {
    pub fn as_meters(&self) -> f64 {
        self.0 * 1000.0
    }
}

/// Kilometers per hour
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct KilometersPerHour(#[serde(serialize_with = "round4")] pub f64);

/// Percent (0.0 to 100.0)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Percent(#[serde(serialize_with = "round4")] pub f64);

impl Percent {
    /// Create a new percent, clamping to [0.0, 100.0]. NaN becomes 0.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 100.0))
    }

    /// Get as a ratio (0-1)
    pub fn as_ratio(&self) -> f64 {
        self.0 / 100.0
    }
}

/// Great-circle distance between two (latitude, longitude) pairs
pub fn haversine(from: (f64, f64), to: (f64, f64)) -> Kilometers {
    const R: f64 = 6372.8; // Radius of the earth in km

    let d_lat = (to.0 - from.0).to_radians();
    let d_lon = (to.1 - from.1).to_radians();
    let lat1 = from.0.to_radians();
    let lat2 = to.0.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    Kilometers(R * c)
}
