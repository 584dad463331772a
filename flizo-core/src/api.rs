//! Tracking API trait definition

use crate::error::ApiError;
use crate::model::{
    Alert, Device, DeviceCommand, Geofence, HistoryData, HistoryQuery, PasswordChange,
    PointOfInterest, ReportLink, ReportRequest, SavedRoute, SharingLink,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type ApiResult<T> = Result<T, ApiError>;

/// Trait for backends of the remote tracking service
///
/// Implementations carry their own session context and attach the current
/// token to every authenticated call. Every method maps HTTP 401 to
/// [`ApiError::Unauthorized`].
#[async_trait]
pub trait TrackingApi: Send + Sync {
    /// Short identifier of this backend (e.g. "http", "demo")
    fn name(&self) -> &str;

    /// Exchange credentials for a session token
    async fn login(&self, email: &str, password: &str) -> ApiResult<String>;

    /// All devices visible to the current user with their last position
    async fn devices(&self) -> ApiResult<Vec<Device>>;

    /// Trip history for one device over a closed time range
    async fn history(&self, query: &HistoryQuery) -> ApiResult<HistoryData>;

    /// Reverse geocode a position
    ///
    /// Returns `Ok(None)` when the service reports that no address exists.
    async fn geocode(&self, latitude: f64, longitude: f64) -> ApiResult<Option<String>>;

    async fn alerts(&self) -> ApiResult<Vec<Alert>>;

    async fn set_alert_active(&self, alert_id: i64, active: bool) -> ApiResult<()>;

    async fn geofences(&self) -> ApiResult<Vec<Geofence>>;

    async fn routes(&self) -> ApiResult<Vec<SavedRoute>>;

    async fn points_of_interest(&self) -> ApiResult<Vec<PointOfInterest>>;

    /// Ask the service to render a report; the result points at the output
    async fn generate_report(&self, request: &ReportRequest) -> ApiResult<ReportLink>;

    /// Fetch the rendered HTML behind a [`ReportLink`]
    async fn fetch_report(&self, link: &ReportLink) -> ApiResult<String>;

    async fn send_command(&self, device_id: i64, command: &DeviceCommand) -> ApiResult<()>;

    async fn create_sharing_link(
        &self,
        device_id: i64,
        expires_at: DateTime<Utc>,
    ) -> ApiResult<SharingLink>;

    /// Forward a push-notification token so the service can reach this client
    async fn register_push_token(&self, push_token: &str) -> ApiResult<()>;

    /// Callers validate the request first; see [`PasswordChange::validate`]
    async fn change_password(&self, change: &PasswordChange) -> ApiResult<()>;
}
