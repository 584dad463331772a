//! Trip history and fleet data model
//!
//! The remote tracking API is loose about field names and types: coordinates
//! arrive as `lat`/`lng` or `latitude`/`longitude`, numbers may be encoded as
//! strings, flags as `0`/`1`. Everything in here deserializes leniently and
//! serializes back out in one canonical shape.

use crate::error::ValidationError;
use crate::units::{haversine, Kilometers, KilometersPerHour};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Shown wherever an address could not be resolved
pub const ADDRESS_UNAVAILABLE: &str = "address unavailable";

// =============================================================================
// Lenient value coercion
// =============================================================================

/// Coerce a JSON number or numeric string into an f64. Anything else is NaN.
pub fn coerce_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.trim(), "1" | "true" | "yes" | "on"),
        _ => false,
    }
}

fn de_lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(d)?;
    let v = coerce_f64(&value);
    Ok(if v.is_finite() { v } else { 0.0 })
}

fn de_lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(coerce_string(&Value::deserialize(d)?))
}

fn de_lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(coerce_bool(&Value::deserialize(d)?))
}

static NULL: Value = Value::Null;

/// First present, non-null value among `keys`
fn pick<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> &'a Value {
    keys.iter()
        .filter_map(|k| fields.get(*k))
        .find(|v| !v.is_null())
        .unwrap_or(&NULL)
}

// =============================================================================
// Trip history
// =============================================================================

/// A single recorded position.
///
/// Coordinates that fail to parse are kept as NaN so the row still shows in
/// detail lists; the normalizer drops them from the route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct TripPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
    pub speed: KilometersPerHour,
    pub address: Option<String>,
}

impl From<Map<String, Value>> for TripPoint {
    fn from(fields: Map<String, Value>) -> Self {
        let speed = coerce_f64(pick(&fields, &["speed"]));
        let address = match pick(&fields, &["address"]) {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };

        TripPoint {
            latitude: coerce_f64(pick(&fields, &["lat", "latitude"])),
            longitude: coerce_f64(pick(&fields, &["lng", "longitude", "lon"])),
            timestamp: coerce_string(pick(&fields, &["time", "timestamp", "raw_time"])),
            speed: KilometersPerHour(if speed.is_finite() { speed } else { 0.0 }),
            address,
        }
    }
}

impl TripPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp: impl Into<String>, speed: f64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp: timestamp.into(),
            speed: KilometersPerHour(speed),
            address: None,
        }
    }

    pub fn has_finite_coordinates(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    pub fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// Driving-state classification of a run of points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Drive,
    Stop,
    Idle,
    End,
    Event,
}

impl GroupStatus {
    /// Numeric codes used by the tracking API
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => GroupStatus::Drive,
            2 => GroupStatus::Stop,
            3 => GroupStatus::End,
            4 => GroupStatus::Idle,
            _ => GroupStatus::Event,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "drive" | "driving" | "move" | "moving" => GroupStatus::Drive,
            "stop" | "stopped" | "parked" => GroupStatus::Stop,
            "idle" | "idling" => GroupStatus::Idle,
            "end" => GroupStatus::End,
            other => match other.parse::<i64>() {
                Ok(code) => GroupStatus::from_code(code),
                Err(_) => GroupStatus::Event,
            },
        }
    }
}

impl<'de> Deserialize<'de> for GroupStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => GroupStatus::from_code(n.as_i64().unwrap_or(0)),
            Value::String(s) => GroupStatus::from_name(&s),
            _ => GroupStatus::Event,
        })
    }
}

/// A contiguous run of positions sharing one driving state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripPointGroup {
    pub status: GroupStatus,

    #[serde(default, alias = "raw_time", deserialize_with = "de_lenient_string")]
    pub raw_timestamp: String,

    #[serde(default)]
    pub items: Vec<TripPoint>,
}

impl TripPointGroup {
    pub fn first_point(&self) -> Option<&TripPoint> {
        self.items.first()
    }

    /// Resolved address of the group, attached to its first point
    pub fn address(&self) -> Option<&str> {
        self.first_point().and_then(|p| p.address.as_deref())
    }

    pub fn display_address(&self) -> &str {
        self.address().unwrap_or(ADDRESS_UNAVAILABLE)
    }

    pub fn set_address(&mut self, address: Option<String>) {
        if let Some(first) = self.items.first_mut() {
            first.address = address;
        }
    }
}

/// Aggregate figures for a history query, as display text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub top_speed: String,

    #[serde(default, alias = "distance_sum", deserialize_with = "de_lenient_string")]
    pub total_distance: String,

    #[serde(default, deserialize_with = "de_lenient_string")]
    pub stop_duration: String,

    #[serde(default, deserialize_with = "de_lenient_string")]
    pub move_duration: String,
}

/// Result of one history query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryData {
    #[serde(default)]
    pub items: Vec<TripPointGroup>,

    #[serde(flatten)]
    pub summary: HistorySummary,
}

impl HistoryData {
    pub fn point_count(&self) -> usize {
        self.items.iter().map(|g| g.items.len()).sum()
    }

    /// True when no group carries a single point
    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }
}

/// Parameters of a history query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub device_id: Option<i64>,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    #[serde(default)]
    pub snap_to_road: bool,
}

impl HistoryQuery {
    pub fn new(device_id: i64, from: NaiveDateTime, to: NaiveDateTime) -> Self {
        Self {
            device_id: Some(device_id),
            from,
            to,
            snap_to_road: false,
        }
    }

    /// Check preconditions and return the selected device id
    pub fn validate(&self) -> Result<i64, ValidationError> {
        let device_id = self.device_id.ok_or(ValidationError::NoDeviceSelected)?;
        if self.from > self.to {
            return Err(ValidationError::InvertedRange {
                from: self.from,
                to: self.to,
            });
        }
        Ok(device_id)
    }

    /// Query string parameters for the remote history endpoint
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(6);
        if let Some(id) = self.device_id {
            params.push(("device_id", id.to_string()));
        }
        params.push(("from_date", self.from.format("%Y-%m-%d").to_string()));
        params.push(("from_time", self.from.format("%H:%M").to_string()));
        params.push(("to_date", self.to.format("%Y-%m-%d").to_string()));
        params.push(("to_time", self.to.format("%H:%M").to_string()));
        params.push(("snap_to_road", (self.snap_to_road as u8).to_string()));
        params
    }
}

// =============================================================================
// Playback route
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Flattened, deduplicated coordinates used to drive playback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutePath(Vec<RoutePoint>);

impl RoutePath {
    pub fn new(points: Vec<RoutePoint>) -> Self {
        Self(points)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RoutePoint> {
        self.0.get(index)
    }

    pub fn points(&self) -> &[RoutePoint] {
        &self.0
    }

    /// Sum of great-circle distances between consecutive points
    pub fn length(&self) -> Kilometers {
        Kilometers(
            self.0
                .windows(2)
                .map(|w| haversine((w[0].latitude, w[0].longitude), (w[1].latitude, w[1].longitude)).0)
                .sum(),
        )
    }
}

// =============================================================================
// Fleet
// =============================================================================

/// UI category of a device, derived from the API's `online` string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Moving,
    Stopped,
    Offline,
}

impl DeviceStatus {
    /// Single place where raw status strings are mapped to categories
    pub fn classify(online: &str, speed: f64) -> Self {
        match online.trim().to_lowercase().as_str() {
            "online" | "moving" if speed > 0.0 => DeviceStatus::Moving,
            "online" | "moving" | "ack" | "engine" | "idle" | "stopped" | "parked" => DeviceStatus::Stopped,
            _ => DeviceStatus::Offline,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "moving" => Some(DeviceStatus::Moving),
            "stopped" => Some(DeviceStatus::Stopped),
            "offline" => Some(DeviceStatus::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,

    #[serde(default, deserialize_with = "de_lenient_string")]
    pub name: String,

    #[serde(default, deserialize_with = "de_lenient_string")]
    pub online: String,

    #[serde(default, alias = "lat", deserialize_with = "de_lenient_f64")]
    pub latitude: f64,

    #[serde(default, alias = "lng", deserialize_with = "de_lenient_f64")]
    pub longitude: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub speed: f64,

    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub course: f64,

    #[serde(default, deserialize_with = "de_lenient_string")]
    pub time: String,
}

impl Device {
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::classify(&self.online, self.speed)
    }
}

// =============================================================================
// Settings and auxiliary resources
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "de_lenient_bool")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: i64,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "de_lenient_bool")]
    pub active: bool,
    #[serde(default)]
    pub polygon_color: Option<String>,
}

/// A saved route layer (distinct from the playback [`RoutePath`])
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRoute {
    pub id: i64,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "de_lenient_bool")]
    pub active: bool,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub id: i64,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "lat", deserialize_with = "de_lenient_f64")]
    pub latitude: f64,
    #[serde(default, alias = "lng", deserialize_with = "de_lenient_f64")]
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub device_ids: Vec<i64>,
    pub report_type: String,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    #[serde(default = "default_report_format")]
    pub format: String,
}

fn default_report_format() -> String {
    "html".to_string()
}

impl ReportRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_ids.is_empty() {
            return Err(ValidationError::NoDeviceSelected);
        }
        if self.report_type.trim().is_empty() {
            return Err(ValidationError::MissingField("report_type"));
        }
        if self.from > self.to {
            return Err(ValidationError::InvertedRange {
                from: self.from,
                to: self.to,
            });
        }
        Ok(())
    }
}

/// Where a generated report can be fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLink {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

/// Time-limited, unauthenticated read-only view of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharingLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordChange {
    pub password: String,
    pub password_confirmation: String,
}

impl PasswordChange {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.password.is_empty() {
            return Err(ValidationError::MissingField("password"));
        }
        if self.password != self.password_confirmation {
            return Err(ValidationError::PasswordMismatch);
        }
        Ok(())
    }
}
