//! REST API and SSE routes

use crate::history::{run_query, HistoryView};
use crate::playback::{self, ControlError, PlaybackAction};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse,
    },
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use flizo_core::api::ApiResult;
use flizo_core::error::GENERIC_FAILURE_MESSAGE;
use flizo_core::model::{
    DeviceCommand, GroupStatus, PasswordChange, ReportRequest, TripPoint,
};
use flizo_core::push::PushRegistration;
use flizo_core::session::StoreError;
use flizo_core::{ApiError, Device, DeviceStatus, HistoryQuery, ValidationError};
use futures::stream::{Stream, StreamExt as FuturesStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

type HandlerError = (StatusCode, String);
type HandlerResult<T> = Result<T, HandlerError>;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/session", get(session_info).post(login).delete(logout))
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:id/commands", post(send_command))
        .route("/api/devices/:id/share", post(share_device))
        // History and playback
        .route(
            "/api/history",
            get(history_view).post(history_query).delete(history_close),
        )
        .route("/api/history/route", get(history_route))
        .route("/api/playback", get(playback_state))
        .route("/api/playback/control", post(playback_control))
        .route("/api/playback/stream", get(playback_stream))
        // Map layers and settings
        .route("/api/alerts", get(list_alerts))
        .route("/api/alerts/:id", post(set_alert))
        .route("/api/geofences", get(list_geofences))
        .route("/api/routes", get(list_routes))
        .route("/api/pois", get(list_pois))
        .route("/api/reports", post(generate_report))
        .route("/api/push", post(register_push))
        .route("/api/settings/language", put(set_language))
        .route("/api/settings/password", put(change_password))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// === Error mapping ===

/// Map a remote failure to a response. A 401 also ends the local session.
async fn reject(state: &AppState, err: ApiError) -> HandlerError {
    match err {
        ApiError::Unauthorized => {
            state.invalidate_session().await;
            (StatusCode::UNAUTHORIZED, err.user_message())
        }
        ApiError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
        ApiError::Service { status, ref message } => {
            warn!("Tracking API error {}: {}", status, message);
            (StatusCode::BAD_GATEWAY, err.user_message())
        }
        ApiError::Transport(ref e) | ApiError::Decode(ref e) => {
            warn!("Tracking API unreachable: {}", e);
            (StatusCode::BAD_GATEWAY, GENERIC_FAILURE_MESSAGE.to_string())
        }
    }
}

async fn upstream<T>(state: &AppState, call: impl Future<Output = ApiResult<T>>) -> HandlerResult<T> {
    match call.await {
        Ok(value) => Ok(value),
        Err(e) => Err(reject(state, e).await),
    }
}

fn invalid(e: ValidationError) -> HandlerError {
    (StatusCode::BAD_REQUEST, e.to_string())
}

fn storage_failure(e: StoreError) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to update session: {}", e),
    )
}

fn control_failure(e: ControlError) -> HandlerError {
    match e {
        ControlError::NoView => (StatusCode::NOT_FOUND, e.to_string()),
        _ => (StatusCode::BAD_REQUEST, e.to_string()),
    }
}

fn no_view() -> HandlerError {
    control_failure(ControlError::NoView)
}

// === Session Endpoints ===

async fn session_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "authenticated": state.session.is_authenticated(),
        "remember_me": state.session.remember_me(),
        "language": state.session.language(),
        "backend": state.api.name(),
    }))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
    #[serde(default)]
    remember_me: bool,
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    if request.email.trim().is_empty() {
        return Err(invalid(ValidationError::MissingField("email")));
    }
    if request.password.is_empty() {
        return Err(invalid(ValidationError::MissingField("password")));
    }

    let token = upstream(&state, state.api.login(request.email.trim(), &request.password)).await?;
    state
        .session
        .begin(&token, request.remember_me)
        .map_err(storage_failure)?;
    info!("Logged in as {}", request.email.trim());

    match state.push.flush().await {
        Ok(true) => info!("Pending push token registered"),
        Ok(false) => {}
        Err(e) => warn!("Pending push token not registered: {}", e),
    }

    Ok(Json(json!({
        "status": "ok",
        "remember_me": request.remember_me,
    })))
}

async fn logout(State(state): State<AppState>) -> StatusCode {
    state.invalidate_session().await;
    StatusCode::NO_CONTENT
}

// === Device Endpoints ===

#[derive(Deserialize)]
struct DevicesQuery {
    status: Option<String>,
}

#[derive(Serialize)]
struct DeviceEntry {
    #[serde(flatten)]
    device: Device,
    status: DeviceStatus,
}

async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DevicesQuery>,
) -> HandlerResult<Json<Vec<DeviceEntry>>> {
    let filter = match query.status {
        Some(raw) => Some(
            DeviceStatus::parse(&raw)
                .ok_or((StatusCode::BAD_REQUEST, format!("Unknown status: {}", raw)))?,
        ),
        None => None,
    };

    let devices = match state.api.devices().await {
        Ok(devices) => {
            if let Err(e) = state.session.cache_devices(&devices) {
                warn!("Failed to cache devices: {}", e);
            }
            devices
        }
        Err(ApiError::Transport(e)) if !state.session.cached_devices().is_empty() => {
            warn!("Serving cached devices, tracking API unreachable: {}", e);
            state.session.cached_devices()
        }
        Err(e) => return Err(reject(&state, e).await),
    };

    let entries = devices
        .into_iter()
        .map(|device| DeviceEntry {
            status: device.status(),
            device,
        })
        .filter(|entry| filter.map(|f| f == entry.status).unwrap_or(true))
        .collect();

    Ok(Json(entries))
}

async fn send_command(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
    Json(command): Json<DeviceCommand>,
) -> HandlerResult<Json<serde_json::Value>> {
    upstream(&state, state.api.send_command(device_id, &command)).await?;
    info!("Command {} sent to device {}", command.command_type, device_id);
    Ok(Json(json!({"status": "sent"})))
}

#[derive(Deserialize)]
struct ShareRequest {
    expires_at: Option<DateTime<Utc>>,
    hours: Option<i64>,
}

async fn share_device(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
    Json(request): Json<ShareRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    let expires_at = match (request.expires_at, request.hours) {
        (Some(at), _) => at,
        (None, Some(hours)) if hours > 0 => Utc::now() + Duration::hours(hours),
        (None, Some(hours)) => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("Sharing duration must be positive, got {} hours", hours),
            ))
        }
        (None, None) => Utc::now() + Duration::hours(24),
    };

    let link = upstream(&state, state.api.create_sharing_link(device_id, expires_at)).await?;
    Ok(Json(json!(link)))
}

// === History Endpoints ===

async fn history_query(
    State(state): State<AppState>,
    Json(query): Json<HistoryQuery>,
) -> HandlerResult<Json<serde_json::Value>> {
    let outcome = upstream(&state, run_query(&state, query)).await?;
    Ok(Json(json!(outcome)))
}

#[derive(Serialize)]
struct GroupEntry<'a> {
    status: GroupStatus,
    raw_timestamp: &'a str,
    address: &'a str,
    points: &'a [TripPoint],
}

fn view_json(view: &HistoryView) -> serde_json::Value {
    let groups: Vec<GroupEntry> = view
        .history
        .items
        .iter()
        .map(|g| GroupEntry {
            status: g.status,
            raw_timestamp: &g.raw_timestamp,
            address: g.display_address(),
            points: &g.items,
        })
        .collect();

    json!({
        "query": view.query,
        "summary": view.history.summary,
        "groups": groups,
        "point_count": view.history.point_count(),
        "route_len": view.route().len(),
        "can_play": view.clock.can_play(),
        "addresses_resolved": view.addresses_resolved,
    })
}

async fn history_view(State(state): State<AppState>) -> HandlerResult<Json<serde_json::Value>> {
    let view = state.view.read().await;
    let view = view.as_ref().ok_or_else(no_view)?;
    Ok(Json(view_json(view)))
}

async fn history_route(State(state): State<AppState>) -> HandlerResult<Json<serde_json::Value>> {
    let view = state.view.read().await;
    let view = view.as_ref().ok_or_else(no_view)?;
    Ok(Json(json!({
        "points": view.route(),
        "length_km": view.route().length(),
    })))
}

async fn history_close(State(state): State<AppState>) -> HandlerResult<StatusCode> {
    if state.close_view().await {
        info!("History view closed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(no_view())
    }
}

// === Playback Endpoints ===

async fn playback_state(State(state): State<AppState>) -> HandlerResult<Json<serde_json::Value>> {
    let snapshot = playback::current_state(&state)
        .await
        .map_err(control_failure)?;
    Ok(Json(json!(snapshot)))
}

#[derive(Deserialize)]
struct ControlRequest {
    action: String,
    value: Option<f64>,
}

async fn playback_control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    let action = PlaybackAction::parse(&request.action, request.value).map_err(control_failure)?;
    let snapshot = playback::control(&state, action)
        .await
        .map_err(control_failure)?;
    Ok(Json(json!(snapshot)))
}

async fn playback_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(e) => {
                    tracing::error!("Failed to serialize playback event: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Playback stream lagged: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// === Layers and Settings Endpoints ===

async fn list_alerts(State(state): State<AppState>) -> HandlerResult<impl IntoResponse> {
    Ok(Json(upstream(&state, state.api.alerts()).await?))
}

#[derive(Deserialize)]
struct AlertToggle {
    active: bool,
}

async fn set_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
    Json(toggle): Json<AlertToggle>,
) -> HandlerResult<Json<serde_json::Value>> {
    upstream(&state, state.api.set_alert_active(alert_id, toggle.active)).await?;
    Ok(Json(json!({"id": alert_id, "active": toggle.active})))
}

async fn list_geofences(State(state): State<AppState>) -> HandlerResult<impl IntoResponse> {
    Ok(Json(upstream(&state, state.api.geofences()).await?))
}

async fn list_routes(State(state): State<AppState>) -> HandlerResult<impl IntoResponse> {
    Ok(Json(upstream(&state, state.api.routes()).await?))
}

async fn list_pois(State(state): State<AppState>) -> HandlerResult<impl IntoResponse> {
    Ok(Json(upstream(&state, state.api.points_of_interest()).await?))
}

/// Generate a report and return the rendered HTML
async fn generate_report(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> HandlerResult<Html<String>> {
    request.validate().map_err(invalid)?;
    let link = upstream(&state, state.api.generate_report(&request)).await?;
    let html = upstream(&state, state.api.fetch_report(&link)).await?;
    Ok(Html(html))
}

#[derive(Deserialize)]
struct PushRequest {
    token: String,
}

async fn register_push(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    if request.token.trim().is_empty() {
        return Err(invalid(ValidationError::MissingField("token")));
    }
    let status = match upstream(&state, state.push.register(request.token.trim())).await? {
        PushRegistration::Registered => "registered",
        PushRegistration::Queued => "queued",
    };
    Ok(Json(json!({"status": status})))
}

#[derive(Deserialize)]
struct LanguageRequest {
    language: String,
}

async fn set_language(
    State(state): State<AppState>,
    Json(request): Json<LanguageRequest>,
) -> HandlerResult<Json<serde_json::Value>> {
    let language = request.language.trim();
    if language.is_empty() {
        return Err(invalid(ValidationError::MissingField("language")));
    }
    state
        .session
        .set_language(language)
        .map_err(storage_failure)?;
    Ok(Json(json!({"language": language})))
}

async fn change_password(
    State(state): State<AppState>,
    Json(change): Json<PasswordChange>,
) -> HandlerResult<StatusCode> {
    change.validate().map_err(invalid)?;
    upstream(&state, state.api.change_password(&change)).await?;
    Ok(StatusCode::NO_CONTENT)
}
