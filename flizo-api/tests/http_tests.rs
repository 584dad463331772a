//! Integration tests for the HTTP backend
//!
//! Each test binds a small axum server on an ephemeral port that mimics the
//! remote tracking API, then talks to it through `HttpTrackingApi`.

use axum::extract::{Form, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveDateTime};
use flizo_api::HttpTrackingApi;
use flizo_core::model::{GroupStatus, PasswordChange, ReportLink};
use flizo_core::normalize::build_route_path;
use flizo_core::{ApiError, HistoryQuery, Session, TrackingApi, ValidationError};
use serde_json::json;
use std::collections::HashMap;

const TOKEN: &str = "abc123";

type Params = Query<HashMap<String, String>>;

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn authorized(params: &HashMap<String, String>) -> bool {
    params.get("user_api_hash").map(String::as_str) == Some(TOKEN)
}

async fn login(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
    if form.get("password").map(String::as_str) == Some("pw") {
        (StatusCode::OK, Json(json!({ "status": 1, "user_api_hash": TOKEN })))
    } else {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "status": 0, "message": "Wrong email or password" })),
        )
    }
}

async fn devices(Query(params): Params) -> impl IntoResponse {
    if !authorized(&params) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Unauthenticated." })));
    }
    (
        StatusCode::OK,
        Json(json!([
            { "id": 0, "title": "Ungrouped", "items": [
                { "id": 7, "name": "Van", "online": "online", "lat": "55.68", "lng": "12.57", "speed": "31" }
            ]},
            { "id": 3, "title": "Trucks", "items": [
                { "id": 8, "name": "Truck", "online": "offline", "lat": 55.66, "lng": 12.51, "speed": 0 }
            ]}
        ])),
    )
}

async fn history(Query(params): Params) -> impl IntoResponse {
    if !authorized(&params) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let expected = [
        ("device_id", "7"),
        ("from_date", "2024-03-01"),
        ("from_time", "08:00"),
        ("to_date", "2024-03-02"),
        ("to_time", "17:30"),
        ("snap_to_road", "1"),
    ];
    for (key, value) in expected {
        if params.get(key).map(String::as_str) != Some(value) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": format!("bad {}", key) })),
            );
        }
    }
    (
        StatusCode::OK,
        Json(json!({
            "items": [
                { "status": 1, "raw_time": "2024-03-01 08:00:00", "items": [
                    { "lat": "55.1", "lng": "12.1", "time": "08:00", "speed": "20" },
                    { "lat": "55.1", "lng": "12.1", "time": "08:01", "speed": "0" },
                    { "lat": "bogus", "lng": "12.2", "time": "08:02" },
                    { "latitude": 55.2, "longitude": 12.2, "time": "08:03" }
                ]},
                { "status": "stop", "raw_time": "2024-03-01 08:05:00", "items": [
                    { "lat": 55.2, "lng": 12.2, "time": "08:05" }
                ]}
            ],
            "top_speed": 54,
            "distance_sum": "12.4 km",
            "stop_duration": "1h 2min",
            "move_duration": "3h"
        })),
    )
}

async fn geo_address(Query(params): Params) -> impl IntoResponse {
    if !authorized(&params) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    match params.get("lat").map(String::as_str) {
        Some("1") => (StatusCode::OK, "Main St 1".to_string()),
        Some("2") => (StatusCode::OK, "\"Quoted Rd 2\"".to_string()),
        _ => (StatusCode::OK, "-".to_string()),
    }
}

async fn failing_alerts() -> impl IntoResponse {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Database unavailable" })),
    )
}

async fn geofences(Query(params): Params) -> impl IntoResponse {
    if !authorized(&params) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    (StatusCode::OK, "<html>not json</html>".to_string())
}

async fn routes(Query(params): Params) -> impl IntoResponse {
    if !authorized(&params) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    let lang = params.get("lang").cloned().unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({ "items": [{ "id": 1, "name": format!("route-{}", lang), "active": "1" }] })),
    )
}

async fn change_password(Query(params): Params, Json(body): Json<serde_json::Value>) -> impl IntoResponse {
    if !authorized(&params) {
        return StatusCode::UNAUTHORIZED;
    }
    if body["password"] == body["password_confirmation"] {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// Reports whether the session token came along
async fn report_file(Query(params): Params) -> String {
    format!("<html>token={}</html>", params.contains_key("user_api_hash"))
}

fn mock_router() -> Router {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/get_devices", get(devices))
        .route("/api/get_history", get(history))
        .route("/api/geo_address", get(geo_address))
        .route("/api/get_alerts", get(failing_alerts))
        .route("/api/get_geofences", get(geofences))
        .route("/api/get_routes", get(routes))
        .route("/api/change_password", post(change_password))
        .route("/files/report.html", get(report_file))
}

async fn spawn_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, mock_router()).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn client(token: Option<&str>) -> (Session, HttpTrackingApi) {
    let base = spawn_server().await;
    let session = Session::in_memory();
    if let Some(token) = token {
        session.begin(token, false).unwrap();
    }
    let api = HttpTrackingApi::new(base, session.clone());
    (session, api)
}

#[tokio::test]
async fn test_login_returns_token() {
    let (_, api) = client(None).await;
    assert_eq!(api.login("me@example.com", "pw").await.unwrap(), TOKEN);
}

#[tokio::test]
async fn test_login_failure_surfaces_server_message() {
    let (_, api) = client(None).await;
    let err = api.login("me@example.com", "nope").await.unwrap_err();
    assert!(matches!(err, ApiError::Service { status: 422, .. }));
    assert_eq!(err.user_message(), "Wrong email or password");
}

#[tokio::test]
async fn test_devices_flattened_from_groups() {
    let (_, api) = client(Some(TOKEN)).await;
    let devices = api.devices().await.unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].name, "Van");
    assert_eq!(devices[0].latitude, 55.68);
    assert_eq!(devices[0].speed, 31.0);
    assert_eq!(devices[1].id, 8);
}

#[tokio::test]
async fn test_stale_token_maps_to_unauthorized() {
    let (_, api) = client(Some("expired")).await;
    assert!(matches!(api.devices().await, Err(ApiError::Unauthorized)));
}

#[tokio::test]
async fn test_missing_token_is_unauthorized_without_request() {
    let api = HttpTrackingApi::new("http://127.0.0.1:9", Session::in_memory());
    assert!(matches!(api.devices().await, Err(ApiError::Unauthorized)));
}

#[tokio::test]
async fn test_history_query_parameters_and_parsing() {
    let (_, api) = client(Some(TOKEN)).await;
    let mut query = HistoryQuery::new(7, at(1, 8, 0), at(2, 17, 30));
    query.snap_to_road = true;

    let history = api.history(&query).await.unwrap();
    assert_eq!(history.items.len(), 2);
    assert_eq!(history.items[0].status, GroupStatus::Drive);
    assert_eq!(history.items[1].status, GroupStatus::Stop);
    assert!(history.items[0].items[2].latitude.is_nan());
    assert_eq!(history.summary.top_speed, "54");
    assert_eq!(history.summary.total_distance, "12.4 km");

    // duplicate, unparseable and repeated-across-groups points are dropped
    let route = build_route_path(&history);
    assert_eq!(route.len(), 2);
}

#[tokio::test]
async fn test_history_validates_before_request() {
    let (_, api) = client(Some(TOKEN)).await;
    let mut query = HistoryQuery::new(7, at(2, 8, 0), at(1, 8, 0));
    assert!(matches!(
        api.history(&query).await,
        Err(ApiError::Validation(ValidationError::InvertedRange { .. }))
    ));
    query.device_id = None;
    assert!(matches!(
        api.history(&query).await,
        Err(ApiError::Validation(ValidationError::NoDeviceSelected))
    ));
}

#[tokio::test]
async fn test_geocode_text_and_sentinel() {
    let (_, api) = client(Some(TOKEN)).await;
    assert_eq!(api.geocode(1.0, 5.0).await.unwrap().as_deref(), Some("Main St 1"));
    assert_eq!(api.geocode(2.0, 5.0).await.unwrap().as_deref(), Some("Quoted Rd 2"));
    assert_eq!(api.geocode(3.0, 5.0).await.unwrap(), None);
}

#[tokio::test]
async fn test_service_error_uses_error_field() {
    let (_, api) = client(Some(TOKEN)).await;
    let err = api.alerts().await.unwrap_err();
    assert!(matches!(err, ApiError::Service { status: 500, .. }));
    assert_eq!(err.user_message(), "Database unavailable");
}

#[tokio::test]
async fn test_unparseable_body_is_decode_error() {
    let (_, api) = client(Some(TOKEN)).await;
    assert!(matches!(api.geofences().await, Err(ApiError::Decode(_))));
}

#[tokio::test]
async fn test_language_is_forwarded() {
    let (session, api) = client(Some(TOKEN)).await;
    session.set_language("da").unwrap();
    let routes = api.routes().await.unwrap();
    assert_eq!(routes[0].name, "route-da");
    assert!(routes[0].active);
}

#[tokio::test]
async fn test_change_password_checks_confirmation_locally() {
    let (_, api) = client(Some(TOKEN)).await;
    let ok = PasswordChange {
        password: "s3cret".to_string(),
        password_confirmation: "s3cret".to_string(),
    };
    api.change_password(&ok).await.unwrap();

    let bad = PasswordChange {
        password_confirmation: "other".to_string(),
        ..ok
    };
    assert!(matches!(
        api.change_password(&bad).await,
        Err(ApiError::Validation(ValidationError::PasswordMismatch))
    ));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = Session::in_memory();
    session.begin(TOKEN, false).unwrap();
    let api = HttpTrackingApi::new(format!("http://{}", addr), session);

    let err = api.devices().await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
    assert_eq!(err.user_message(), flizo_core::error::GENERIC_FAILURE_MESSAGE);
}

#[tokio::test]
async fn test_report_token_stays_on_tracking_host() {
    let (_, api) = client(Some(TOKEN)).await;
    let own = ReportLink {
        url: format!("{}/files/report.html", api.base_url()),
    };
    assert_eq!(api.fetch_report(&own).await.unwrap(), "<html>token=true</html>");

    let elsewhere = spawn_server().await;
    let external = ReportLink {
        url: format!("{}/files/report.html", elsewhere),
    };
    assert_eq!(api.fetch_report(&external).await.unwrap(), "<html>token=false</html>");
}
