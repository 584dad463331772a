//! Demo backend that serves a synthetic fleet
//!
//! Four vehicles drive fixed routes through Copenhagen. Positions advance a
//! little on every device poll, and trip history is generated from the same
//! routes so the route, address and playback pipeline can be exercised
//! without a tracking server. Everything is deterministic except timestamps
//! on live device positions.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use flizo_core::address::clean_address;
use flizo_core::api::{ApiResult, TrackingApi};
use flizo_core::model::*;
use flizo_core::session::Session;
use flizo_core::units::{haversine, KilometersPerHour};
use flizo_core::{ApiError, ValidationError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

pub const DEMO_EMAIL: &str = "demo@flizo.app";
pub const DEMO_PASSWORD: &str = "demo";
pub const DEMO_TOKEN: &str = "demo-user-api-hash";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const REPORT_SCHEME: &str = "demo://reports/";

// =============================================================================
// Fleet definition
// =============================================================================

#[derive(Clone, Copy)]
struct Waypoint {
    latitude: f64,
    longitude: f64,
    /// Geocoder answer for this spot; "-" means the service knows no address
    label: &'static str,
}

const fn wp(latitude: f64, longitude: f64, label: &'static str) -> Waypoint {
    Waypoint {
        latitude,
        longitude,
        label,
    }
}

#[derive(Clone, Copy, PartialEq)]
enum TripShape {
    /// Drive out, stop at the far end, drive back, end
    RoundTrip,
    /// Only a single fix inside any range
    SingleFix,
    /// No history at all
    Silent,
}

struct Vehicle {
    id: i64,
    name: &'static str,
    online: &'static str,
    cruise_speed: f64,
    route: &'static [Waypoint],
    trip: TripShape,
}

static VAN_ROUTE: [Waypoint; 4] = [
    wp(55.6833, 12.5713, "Nørre Voldgade 2, 1358 København"),
    wp(55.6805, 12.5860, "Kongens Nytorv 13, 1050 København"),
    wp(55.6797, 12.5916, "Nyhavn 17, 1051 København"),
    wp(55.7100, 12.5950, "-"),
];

static TRUCK_ROUTE: [Waypoint; 4] = [
    wp(55.6614, 12.5160, "Valby Langgade 85, 2500 Valby"),
    wp(55.6670, 12.5350, "Ny Carlsberg Vej 100, 1799 København"),
    wp(55.6713, 12.5510, "Istedgade 70, 1650 København"),
    wp(55.6500, 12.5420, "-"),
];

static CAR_ROUTE: [Waypoint; 2] = [
    wp(55.6400, 12.6000, "Amagerbrogade 150, 2300 København"),
    wp(55.6180, 12.6560, "Lufthavnsboulevarden 6, 2770 Kastrup"),
];

static SCOOTER_ROUTE: [Waypoint; 2] = [
    wp(55.6786, 12.5320, "Frederiksberg Allé 1, 1820 Frederiksberg"),
    wp(55.6880, 12.5590, "Peblinge Dossering 4, 2200 København"),
];

fn demo_fleet() -> Vec<Vehicle> {
    vec![
        Vehicle { id: 1, name: "Van 12", online: "online", cruise_speed: 42.0, route: &VAN_ROUTE, trip: TripShape::RoundTrip },
        Vehicle { id: 2, name: "Truck 7", online: "ack", cruise_speed: 0.0, route: &TRUCK_ROUTE, trip: TripShape::RoundTrip },
        Vehicle { id: 3, name: "Car 3", online: "offline", cruise_speed: 0.0, route: &CAR_ROUTE, trip: TripShape::Silent },
        Vehicle { id: 4, name: "Scooter 9", online: "online", cruise_speed: 18.0, route: &SCOOTER_ROUTE, trip: TripShape::SingleFix },
    ]
}

// =============================================================================
// Route interpolation
// =============================================================================

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Position at `fraction` (0..=1) along a polyline, weighting legs equally
fn position_along(route: &[Waypoint], fraction: f64) -> (f64, f64) {
    match route {
        [] => (0.0, 0.0),
        [only] => (only.latitude, only.longitude),
        _ => {
            let scaled = fraction.clamp(0.0, 1.0) * (route.len() - 1) as f64;
            let leg = (scaled.floor() as usize).min(route.len() - 2);
            let t = scaled - leg as f64;
            let (a, b) = (route[leg], route[leg + 1]);
            (lerp(a.latitude, b.latitude, t), lerp(a.longitude, b.longitude, t))
        }
    }
}

/// Compass heading in degrees between two nearby positions
fn heading(from: (f64, f64), to: (f64, f64)) -> f64 {
    let d_lat = to.0 - from.0;
    let d_lng = (to.1 - from.1) * from.0.to_radians().cos();
    d_lng.atan2(d_lat).to_degrees().rem_euclid(360.0)
}

// =============================================================================
// DemoTrackingApi
// =============================================================================

/// Round trip: 8 drive points, 3 stop points, 5 drive points, 1 end point.
/// The stop and end groups repeat the preceding position, so the derived
/// route keeps 13 of the 17 points.
pub const ROUND_TRIP_POINTS: usize = 17;
pub const ROUND_TRIP_ROUTE_LEN: usize = 13;

pub struct DemoTrackingApi {
    session: Session,
    fleet: Vec<Vehicle>,
    password: Mutex<String>,
    polls: AtomicU64,
    expired: AtomicBool,
    fail_push: AtomicBool,
    alerts: Mutex<Vec<Alert>>,
    push_tokens: Mutex<Vec<String>>,
    commands: Mutex<Vec<(i64, DeviceCommand)>>,
}

impl DemoTrackingApi {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            fleet: demo_fleet(),
            password: Mutex::new(DEMO_PASSWORD.to_string()),
            polls: AtomicU64::new(0),
            expired: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
            alerts: Mutex::new(vec![
                Alert { id: 1, name: "Overspeed 90 km/h".to_string(), active: true },
                Alert { id: 2, name: "Left depot geofence".to_string(), active: false },
                Alert { id: 3, name: "Ignition off".to_string(), active: true },
            ]),
            push_tokens: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Make every authenticated call fail with 401 until the next login
    pub fn expire_session(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    /// Make push-token registration fail with a service error
    pub fn fail_push_registration(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }

    pub fn registered_push_tokens(&self) -> Vec<String> {
        self.push_tokens.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_commands(&self) -> Vec<(i64, DeviceCommand)> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn authorize(&self) -> ApiResult<()> {
        if self.expired.load(Ordering::SeqCst) || self.session.token().as_deref() != Some(DEMO_TOKEN) {
            return Err(ApiError::Unauthorized);
        }
        Ok(())
    }

    fn vehicle(&self, device_id: i64) -> ApiResult<&Vehicle> {
        self.fleet
            .iter()
            .find(|v| v.id == device_id)
            .ok_or_else(|| ApiError::service(404, Some(format!("Device {} not found", device_id))))
    }

    fn device_snapshot(&self, vehicle: &Vehicle, poll: u64) -> Device {
        // Online vehicles loop their route in 20 polls; others sit at the start
        let (fraction, next) = if vehicle.cruise_speed > 0.0 {
            let step = (poll + vehicle.id as u64 * 3) % 20;
            (step as f64 / 20.0, (step + 1) as f64 / 20.0)
        } else {
            (0.0, 0.0)
        };
        let position = position_along(vehicle.route, fraction);
        let course = if next > fraction {
            heading(position, position_along(vehicle.route, next))
        } else {
            0.0
        };

        Device {
            id: vehicle.id,
            name: vehicle.name.to_string(),
            online: vehicle.online.to_string(),
            latitude: position.0,
            longitude: position.1,
            speed: vehicle.cruise_speed,
            course,
            time: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    fn trip_history(&self, vehicle: &Vehicle, query: &HistoryQuery) -> HistoryData {
        let span = query.to - query.from;
        let step = span / ROUND_TRIP_POINTS as i32;
        let stamp = |i: usize| (query.from + step * i as i32).format(TIMESTAMP_FORMAT).to_string();
        let point = |i: usize, fraction: f64, speed: f64| {
            let (lat, lng) = position_along(vehicle.route, fraction);
            TripPoint::new(lat, lng, stamp(i), speed)
        };
        let group = |status: GroupStatus, items: Vec<TripPoint>| TripPointGroup {
            status,
            raw_timestamp: items.first().map(|p| p.timestamp.clone()).unwrap_or_default(),
            items,
        };

        match vehicle.trip {
            TripShape::Silent => HistoryData::default(),
            TripShape::SingleFix => HistoryData {
                items: vec![group(GroupStatus::Stop, vec![point(0, 0.0, 0.0)])],
                summary: summary(vehicle.route, 0.0, span, TimeDelta::zero()),
            },
            TripShape::RoundTrip => {
                let outbound: Vec<TripPoint> =
                    (0..8).map(|i| point(i, i as f64 / 7.0, 35.0 + 5.0 * i as f64)).collect();
                let far_end = outbound[outbound.len() - 1].clone();
                let stop: Vec<TripPoint> = (8..11)
                    .map(|i| TripPoint { timestamp: stamp(i), speed: KilometersPerHour(0.0), ..far_end.clone() })
                    .collect();
                let inbound: Vec<TripPoint> = (1..=5)
                    .map(|i| point(10 + i, 1.0 - i as f64 / 5.0, 50.0 - 4.0 * i as f64))
                    .collect();
                let home = inbound[inbound.len() - 1].clone();
                let end = vec![TripPoint { timestamp: stamp(16), speed: KilometersPerHour(0.0), ..home }];

                let driving = step * 12;
                HistoryData {
                    items: vec![
                        group(GroupStatus::Drive, outbound),
                        group(GroupStatus::Stop, stop),
                        group(GroupStatus::Drive, inbound),
                        group(GroupStatus::End, end),
                    ],
                    summary: summary(vehicle.route, 70.0, driving, span - driving),
                }
            }
        }
    }

    fn nearest_label(&self, latitude: f64, longitude: f64) -> Option<&'static str> {
        self.fleet
            .iter()
            .flat_map(|v| v.route.iter())
            .map(|w| (w, haversine((latitude, longitude), (w.latitude, w.longitude)).0))
            .filter(|(_, km)| *km < 0.5)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(w, _)| w.label)
    }

    fn render_report(&self, request: &ReportRequest) -> String {
        let rows: String = request
            .device_ids
            .iter()
            .filter_map(|id| self.fleet.iter().find(|v| v.id == *id))
            .map(|v| format!("<tr><td>{}</td><td>{}</td></tr>", v.name, v.online))
            .collect();
        format!(
            "<html><body><h1>{} report</h1><p>{} to {}</p><table>{}</table></body></html>",
            request.report_type,
            request.from.format(TIMESTAMP_FORMAT),
            request.to.format(TIMESTAMP_FORMAT),
            rows
        )
    }
}

fn format_duration(d: TimeDelta) -> String {
    let minutes = d.num_minutes().max(0);
    format!("{}h {}min", minutes / 60, minutes % 60)
}

fn summary(route: &[Waypoint], top_speed: f64, moving: TimeDelta, stopped: TimeDelta) -> HistorySummary {
    let path = RoutePath::new(
        route
            .iter()
            .map(|w| RoutePoint { latitude: w.latitude, longitude: w.longitude })
            .collect(),
    );
    let distance = if top_speed > 0.0 { path.length().0 * 2.0 } else { 0.0 };
    HistorySummary {
        top_speed: format!("{:.0} km/h", top_speed),
        total_distance: format!("{:.2} km", distance),
        stop_duration: format_duration(stopped),
        move_duration: format_duration(moving),
    }
}

#[async_trait]
impl TrackingApi for DemoTrackingApi {
    fn name(&self) -> &str {
        "demo"
    }

    async fn login(&self, email: &str, password: &str) -> ApiResult<String> {
        if email.trim().is_empty() {
            return Err(ValidationError::MissingField("email").into());
        }
        let expected = self.password.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if password != expected {
            return Err(ApiError::service(422, Some("Invalid email or password".to_string())));
        }
        self.expired.store(false, Ordering::SeqCst);
        info!("Demo login for {}", email);
        Ok(DEMO_TOKEN.to_string())
    }

    async fn devices(&self) -> ApiResult<Vec<Device>> {
        self.authorize()?;
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.fleet.iter().map(|v| self.device_snapshot(v, poll)).collect())
    }

    async fn history(&self, query: &HistoryQuery) -> ApiResult<HistoryData> {
        self.authorize()?;
        let device_id = query.validate()?;
        let vehicle = self.vehicle(device_id)?;
        let history = self.trip_history(vehicle, query);
        debug!("Demo history for {}: {} points", vehicle.name, history.point_count());
        Ok(history)
    }

    async fn geocode(&self, latitude: f64, longitude: f64) -> ApiResult<Option<String>> {
        self.authorize()?;
        Ok(self
            .nearest_label(latitude, longitude)
            .and_then(clean_address))
    }

    async fn alerts(&self) -> ApiResult<Vec<Alert>> {
        self.authorize()?;
        Ok(self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn set_alert_active(&self, alert_id: i64, active: bool) -> ApiResult<()> {
        self.authorize()?;
        let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| ApiError::service(404, Some(format!("Alert {} not found", alert_id))))?;
        alert.active = active;
        Ok(())
    }

    async fn geofences(&self) -> ApiResult<Vec<Geofence>> {
        self.authorize()?;
        Ok(vec![
            Geofence { id: 1, name: "Nordhavn depot".to_string(), active: true, polygon_color: Some("#1e88e5".to_string()) },
            Geofence { id: 2, name: "City centre".to_string(), active: false, polygon_color: Some("#e53935".to_string()) },
        ])
    }

    async fn routes(&self) -> ApiResult<Vec<SavedRoute>> {
        self.authorize()?;
        Ok(vec![SavedRoute {
            id: 1,
            name: "Harbour delivery loop".to_string(),
            active: true,
            color: Some("#43a047".to_string()),
        }])
    }

    async fn points_of_interest(&self) -> ApiResult<Vec<PointOfInterest>> {
        self.authorize()?;
        Ok(self
            .fleet
            .iter()
            .filter_map(|v| v.route.first().map(|w| (v, w)))
            .map(|(v, w)| PointOfInterest {
                id: v.id,
                name: format!("{} home", v.name),
                description: clean_address(w.label),
                latitude: w.latitude,
                longitude: w.longitude,
            })
            .collect())
    }

    async fn generate_report(&self, request: &ReportRequest) -> ApiResult<ReportLink> {
        self.authorize()?;
        request.validate()?;
        for id in &request.device_ids {
            self.vehicle(*id)?;
        }
        let ids: Vec<String> = request.device_ids.iter().map(|id| id.to_string()).collect();
        Ok(ReportLink {
            url: format!(
                "{}{}?devices={}&from={}&to={}",
                REPORT_SCHEME,
                request.report_type,
                ids.join(","),
                request.from.format("%Y-%m-%dT%H:%M"),
                request.to.format("%Y-%m-%dT%H:%M"),
            ),
        })
    }

    async fn fetch_report(&self, link: &ReportLink) -> ApiResult<String> {
        self.authorize()?;
        let rest = link
            .url
            .strip_prefix(REPORT_SCHEME)
            .ok_or_else(|| ApiError::service(404, Some("Report not found".to_string())))?;
        let (report_type, params) = rest.split_once('?').unwrap_or((rest, ""));

        let mut request = ReportRequest {
            device_ids: Vec::new(),
            report_type: report_type.to_string(),
            from: Default::default(),
            to: Default::default(),
            format: "html".to_string(),
        };
        for (key, value) in params.split('&').filter_map(|kv| kv.split_once('=')) {
            match key {
                "devices" => request.device_ids = value.split(',').filter_map(|id| id.parse().ok()).collect(),
                "from" | "to" => {
                    let parsed = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
                        .map_err(|e| ApiError::Decode(e.to_string()))?;
                    if key == "from" {
                        request.from = parsed;
                    } else {
                        request.to = parsed;
                    }
                }
                _ => {}
            }
        }
        Ok(self.render_report(&request))
    }

    async fn send_command(&self, device_id: i64, command: &DeviceCommand) -> ApiResult<()> {
        self.authorize()?;
        if command.command_type.trim().is_empty() {
            return Err(ValidationError::MissingField("type").into());
        }
        self.vehicle(device_id)?;
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((device_id, command.clone()));
        Ok(())
    }

    async fn create_sharing_link(&self, device_id: i64, expires_at: DateTime<Utc>) -> ApiResult<SharingLink> {
        self.authorize()?;
        self.vehicle(device_id)?;
        if expires_at <= Utc::now() {
            return Err(ApiError::service(
                422,
                Some("Expiration date must be in the future".to_string()),
            ));
        }
        Ok(SharingLink {
            url: format!("https://share.flizo.app/demo/{}/{}", device_id, expires_at.timestamp()),
            expires_at,
        })
    }

    async fn register_push_token(&self, push_token: &str) -> ApiResult<()> {
        self.authorize()?;
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(ApiError::service(503, None));
        }
        self.push_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(push_token.to_string());
        Ok(())
    }

    async fn change_password(&self, change: &PasswordChange) -> ApiResult<()> {
        self.authorize()?;
        change.validate()?;
        *self.password.lock().unwrap_or_else(|e| e.into_inner()) = change.password.clone();
        Ok(())
    }
}
