//! HTTP backend for the remote tracking service
//!
//! Every authenticated request carries the session token as the
//! `user_api_hash` query parameter. HTTP 401 always maps to
//! [`ApiError::Unauthorized`]; other non-2xx responses surface the server's
//! `message` (or `error`) field when it sends one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flizo_core::address::clean_address;
use flizo_core::api::{ApiResult, TrackingApi};
use flizo_core::model::*;
use flizo_core::session::Session;
use flizo_core::ApiError;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const TOKEN_PARAM: &str = "user_api_hash";

/// A list endpoint answers either with a bare array or with `{"items": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Wrapped { items: Vec<T> },
    Plain(Vec<T>),
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Wrapped { items } => items,
            Listing::Plain(items) => items,
        }
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    user_api_hash: String,
}

#[derive(Deserialize)]
struct UrlResponse {
    url: String,
}

pub struct HttpTrackingApi {
    client: Client,
    base_url: String,
    session: Session,
}

impl HttpTrackingApi {
    pub fn new(base_url: impl Into<String>, session: Session) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("flizo-copilot/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Whether `url` is served by the tracking API itself. Relative paths are.
    fn is_own_url(&self, url: &str) -> bool {
        match url.strip_prefix(self.base_url.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
            None => !url.starts_with("http://") && !url.starts_with("https://"),
        }
    }

    /// Token and language parameters for an authenticated call
    fn auth_params(&self) -> ApiResult<Vec<(&'static str, String)>> {
        let token = self.session.token().ok_or(ApiError::Unauthorized)?;
        let mut params = vec![(TOKEN_PARAM, token)];
        if let Some(lang) = self.session.language() {
            params.push(("lang", lang));
        }
        Ok(params)
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<String> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            debug!("Tracking API returned {}: {}", status, body);
            return Err(ApiError::service(status.as_u16(), server_message(&body)));
        }

        Ok(body)
    }

    async fn get_text(&self, path: &str, params: &[(&str, String)]) -> ApiResult<String> {
        let mut query = self.auth_params()?;
        query.extend(params.iter().map(|(k, v)| (*k, v.clone())));
        self.send(self.client.get(self.url(path)).query(&query)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> ApiResult<T> {
        let body = self.get_text(path, params).await?;
        decode(&body)
    }

    async fn post_json(&self, path: &str, body: &Value) -> ApiResult<String> {
        let query = self.auth_params()?;
        self.send(self.client.post(self.url(path)).query(&query).json(body))
            .await
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// `message` or `error` field of a JSON error body
fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| v.as_str().map(str::to_string))
}

/// Devices come either flat or nested inside device groups
fn parse_devices(value: Value) -> ApiResult<Vec<Device>> {
    let entries = match value {
        Value::Object(mut map) => match map.remove("items") {
            Some(items) => items,
            None => return Err(ApiError::Decode("device list is not an array".to_string())),
        },
        other => other,
    };

    let Value::Array(entries) = entries else {
        return Err(ApiError::Decode("device list is not an array".to_string()));
    };

    let mut devices = Vec::new();
    for entry in entries {
        match entry.get("items") {
            Some(Value::Array(nested)) => {
                for device in nested {
                    devices.push(
                        serde_json::from_value(device.clone()).map_err(|e| ApiError::Decode(e.to_string()))?,
                    );
                }
            }
            _ => devices.push(serde_json::from_value(entry).map_err(|e| ApiError::Decode(e.to_string()))?),
        }
    }
    Ok(devices)
}

#[async_trait]
impl TrackingApi for HttpTrackingApi {
    fn name(&self) -> &str {
        "http"
    }

    async fn login(&self, email: &str, password: &str) -> ApiResult<String> {
        let body = self
            .send(
                self.client
                    .post(self.url("/api/login"))
                    .form(&[("email", email), ("password", password)]),
            )
            .await?;
        let response: LoginResponse = decode(&body)?;
        Ok(response.user_api_hash)
    }

    async fn devices(&self) -> ApiResult<Vec<Device>> {
        let value: Value = self.get_json("/api/get_devices", &[]).await?;
        parse_devices(value)
    }

    async fn history(&self, query: &HistoryQuery) -> ApiResult<HistoryData> {
        query.validate()?;
        self.get_json("/api/get_history", &query.query_params()).await
    }

    async fn geocode(&self, latitude: f64, longitude: f64) -> ApiResult<Option<String>> {
        let body = self
            .get_text(
                "/api/geo_address",
                &[("lat", latitude.to_string()), ("lon", longitude.to_string())],
            )
            .await?;
        // Some deployments wrap the text in JSON quotes
        let text = serde_json::from_str::<String>(&body).unwrap_or(body);
        Ok(clean_address(&text))
    }

    async fn alerts(&self) -> ApiResult<Vec<Alert>> {
        let listing: Listing<Alert> = self.get_json("/api/get_alerts", &[]).await?;
        Ok(listing.into_vec())
    }

    async fn set_alert_active(&self, alert_id: i64, active: bool) -> ApiResult<()> {
        self.post_json(
            "/api/change_active_alert",
            &json!({ "id": alert_id, "active": active as u8 }),
        )
        .await
        .map(|_| ())
    }

    async fn geofences(&self) -> ApiResult<Vec<Geofence>> {
        let listing: Listing<Geofence> = self.get_json("/api/get_geofences", &[]).await?;
        Ok(listing.into_vec())
    }

    async fn routes(&self) -> ApiResult<Vec<SavedRoute>> {
        let listing: Listing<SavedRoute> = self.get_json("/api/get_routes", &[]).await?;
        Ok(listing.into_vec())
    }

    async fn points_of_interest(&self) -> ApiResult<Vec<PointOfInterest>> {
        let listing: Listing<PointOfInterest> = self.get_json("/api/get_user_map_icons", &[]).await?;
        Ok(listing.into_vec())
    }

    async fn generate_report(&self, request: &ReportRequest) -> ApiResult<ReportLink> {
        request.validate()?;
        let body = self
            .post_json(
                "/api/generate_report",
                &json!({
                    "devices": request.device_ids,
                    "type": request.report_type,
                    "format": request.format,
                    "date_from": request.from.format("%Y-%m-%d %H:%M").to_string(),
                    "date_to": request.to.format("%Y-%m-%d %H:%M").to_string(),
                }),
            )
            .await?;
        let response: UrlResponse = decode(&body)?;
        Ok(ReportLink { url: response.url })
    }

    async fn fetch_report(&self, link: &ReportLink) -> ApiResult<String> {
        if self.is_own_url(&link.url) {
            return self.get_text(&link.url, &[]).await;
        }
        // Reports hosted elsewhere never see the session token
        debug!("Fetching external report {}", link.url);
        self.send(self.client.get(&link.url)).await
    }

    async fn send_command(&self, device_id: i64, command: &DeviceCommand) -> ApiResult<()> {
        let mut body = json!({
            "device_id": device_id,
            "type": command.command_type,
        });
        for (key, value) in &command.data {
            body[key.as_str()] = Value::String(value.clone());
        }
        self.post_json("/api/send_gprs_command", &body).await.map(|_| ())
    }

    async fn create_sharing_link(&self, device_id: i64, expires_at: DateTime<Utc>) -> ApiResult<SharingLink> {
        let body = self
            .post_json(
                "/api/sharing",
                &json!({
                    "devices": [device_id],
                    "expiration_date": expires_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                }),
            )
            .await?;
        let response: UrlResponse = decode(&body)?;
        Ok(SharingLink {
            url: response.url,
            expires_at,
        })
    }

    async fn register_push_token(&self, push_token: &str) -> ApiResult<()> {
        self.post_json("/api/fcm_token", &json!({ "token": push_token }))
            .await
            .map(|_| ())
    }

    async fn change_password(&self, change: &PasswordChange) -> ApiResult<()> {
        change.validate()?;
        self.post_json(
            "/api/change_password",
            &json!({
                "password": change.password,
                "password_confirmation": change.password_confirmation,
            }),
        )
        .await
        .map(|_| ())
    }
}
