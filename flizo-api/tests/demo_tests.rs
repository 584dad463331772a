//! Integration tests for the demo backend
//!
//! Drives the synthetic fleet through the same core pipeline the service
//! uses: history query, route derivation, address resolution and push-token
//! queueing.

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use flizo_api::demo::{DEMO_EMAIL, DEMO_PASSWORD, ROUND_TRIP_POINTS, ROUND_TRIP_ROUTE_LEN};
use flizo_api::DemoTrackingApi;
use flizo_core::address::AddressResolver;
use flizo_core::model::{DeviceCommand, GroupStatus, PasswordChange, ReportRequest};
use flizo_core::normalize::build_route_path;
use flizo_core::push::{PushRegistrar, PushRegistration};
use flizo_core::session::SessionKey;
use flizo_core::{ApiError, DeviceStatus, HistoryQuery, Session, TrackingApi, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 14)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn logged_out() -> (Session, Arc<DemoTrackingApi>) {
    let session = Session::in_memory();
    let api = Arc::new(DemoTrackingApi::new(session.clone()));
    (session, api)
}

async fn logged_in() -> (Session, Arc<DemoTrackingApi>) {
    let (session, api) = logged_out();
    let token = api.login(DEMO_EMAIL, DEMO_PASSWORD).await.unwrap();
    session.begin(&token, true).unwrap();
    (session, api)
}

// ==================== Authentication ====================

#[tokio::test]
async fn test_login_with_wrong_password_returns_server_message() {
    let (_, api) = logged_out();
    let err = api.login(DEMO_EMAIL, "wrong").await.unwrap_err();
    assert!(matches!(err, ApiError::Service { status: 422, .. }));
    assert_eq!(err.user_message(), "Invalid email or password");
}

#[tokio::test]
async fn test_calls_without_token_are_unauthorized() {
    let (_, api) = logged_out();
    assert!(matches!(api.devices().await, Err(ApiError::Unauthorized)));
    assert!(matches!(
        api.history(&HistoryQuery::new(1, at(8, 0), at(9, 0))).await,
        Err(ApiError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_expired_session_until_next_login() {
    let (session, api) = logged_in().await;
    api.expire_session();
    assert!(matches!(api.alerts().await, Err(ApiError::Unauthorized)));

    let token = api.login(DEMO_EMAIL, DEMO_PASSWORD).await.unwrap();
    session.begin(&token, false).unwrap();
    assert_eq!(api.alerts().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_change_password() {
    let (_, api) = logged_in().await;
    let mismatch = PasswordChange {
        password: "new-secret".to_string(),
        password_confirmation: "new-secre".to_string(),
    };
    assert!(matches!(
        api.change_password(&mismatch).await,
        Err(ApiError::Validation(ValidationError::PasswordMismatch))
    ));

    let change = PasswordChange {
        password: "new-secret".to_string(),
        password_confirmation: "new-secret".to_string(),
    };
    api.change_password(&change).await.unwrap();
    assert!(api.login(DEMO_EMAIL, DEMO_PASSWORD).await.is_err());
    assert!(api.login(DEMO_EMAIL, "new-secret").await.is_ok());
}

// ==================== Fleet ====================

#[tokio::test]
async fn test_fleet_covers_every_status() {
    let (_, api) = logged_in().await;
    let devices = api.devices().await.unwrap();
    let statuses: Vec<DeviceStatus> = devices.iter().map(|d| d.status()).collect();
    assert_eq!(
        statuses,
        vec![
            DeviceStatus::Moving,
            DeviceStatus::Stopped,
            DeviceStatus::Offline,
            DeviceStatus::Moving
        ]
    );
}

#[tokio::test]
async fn test_moving_devices_advance_between_polls() {
    let (_, api) = logged_in().await;
    let first = api.devices().await.unwrap();
    let second = api.devices().await.unwrap();

    assert_ne!(first[0].latitude, second[0].latitude);
    // Parked truck stays put
    assert_eq!(first[1].latitude, second[1].latitude);
    assert_eq!(first[1].longitude, second[1].longitude);
}

// ==================== History pipeline ====================

#[tokio::test]
async fn test_round_trip_history_and_route() {
    let (_, api) = logged_in().await;
    let history = api
        .history(&HistoryQuery::new(1, at(8, 0), at(10, 50)))
        .await
        .unwrap();

    let statuses: Vec<GroupStatus> = history.items.iter().map(|g| g.status).collect();
    assert_eq!(
        statuses,
        vec![GroupStatus::Drive, GroupStatus::Stop, GroupStatus::Drive, GroupStatus::End]
    );
    assert_eq!(history.point_count(), ROUND_TRIP_POINTS);
    assert_eq!(history.items[0].items[0].timestamp, "2024-05-14 08:00:00");
    assert_eq!(history.summary.top_speed, "70 km/h");

    let route = build_route_path(&history);
    assert_eq!(route.len(), ROUND_TRIP_ROUTE_LEN);
}

#[tokio::test]
async fn test_silent_device_returns_empty_history() {
    let (_, api) = logged_in().await;
    let history = api
        .history(&HistoryQuery::new(3, at(8, 0), at(9, 0)))
        .await
        .unwrap();
    assert!(history.is_empty());
    assert!(build_route_path(&history).is_empty());
}

#[tokio::test]
async fn test_single_fix_history() {
    let (_, api) = logged_in().await;
    let history = api
        .history(&HistoryQuery::new(4, at(8, 0), at(8, 0)))
        .await
        .unwrap();
    assert_eq!(history.point_count(), 1);
    assert_eq!(build_route_path(&history).len(), 1);
}

#[tokio::test]
async fn test_history_validation_and_unknown_device() {
    let (_, api) = logged_in().await;
    let inverted = api.history(&HistoryQuery::new(1, at(10, 0), at(9, 0))).await;
    assert!(matches!(
        inverted,
        Err(ApiError::Validation(ValidationError::InvertedRange { .. }))
    ));

    let unknown = api.history(&HistoryQuery::new(99, at(8, 0), at(9, 0))).await;
    assert!(matches!(unknown, Err(ApiError::Service { status: 404, .. })));
}

#[tokio::test]
async fn test_group_addresses() {
    let (_, api) = logged_in().await;
    let history = api
        .history(&HistoryQuery::new(1, at(8, 0), at(10, 50)))
        .await
        .unwrap();

    let resolver = AddressResolver::new(api.clone());
    let addresses = resolver.resolve_groups(&history.items).await.unwrap();

    // Harbour stop geocodes to "-"; the inbound leg starts between waypoints
    assert_eq!(
        addresses,
        vec![
            Some("Nørre Voldgade 2, 1358 København".to_string()),
            None,
            None,
            Some("Nørre Voldgade 2, 1358 København".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_address_lookup_after_expiry_is_unauthorized() {
    let (_, api) = logged_in().await;
    let history = api
        .history(&HistoryQuery::new(1, at(8, 0), at(9, 0)))
        .await
        .unwrap();
    api.expire_session();

    let resolver = AddressResolver::new(api.clone());
    assert!(matches!(
        resolver.resolve_groups(&history.items).await,
        Err(ApiError::Unauthorized)
    ));
}

// ==================== Alerts, reports, commands, sharing ====================

#[tokio::test]
async fn test_toggle_alert() {
    let (_, api) = logged_in().await;
    api.set_alert_active(2, true).await.unwrap();
    let alerts = api.alerts().await.unwrap();
    assert!(alerts.iter().find(|a| a.id == 2).unwrap().active);

    assert!(matches!(
        api.set_alert_active(42, true).await,
        Err(ApiError::Service { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_report_round_trip() {
    let (_, api) = logged_in().await;
    let request = ReportRequest {
        device_ids: vec![1, 2],
        report_type: "general".to_string(),
        from: at(8, 0),
        to: at(18, 0),
        format: "html".to_string(),
    };
    let link = api.generate_report(&request).await.unwrap();
    let html = api.fetch_report(&link).await.unwrap();

    assert!(html.contains("general report"));
    assert!(html.contains("Van 12"));
    assert!(html.contains("Truck 7"));
    assert!(!html.contains("Car 3"));
    assert!(html.contains("2024-05-14 08:00:00"));
}

#[tokio::test]
async fn test_report_requires_devices() {
    let (_, api) = logged_in().await;
    let request = ReportRequest {
        device_ids: vec![],
        report_type: "general".to_string(),
        from: at(8, 0),
        to: at(18, 0),
        format: "html".to_string(),
    };
    assert!(matches!(
        api.generate_report(&request).await,
        Err(ApiError::Validation(ValidationError::NoDeviceSelected))
    ));
}

#[tokio::test]
async fn test_send_command_is_recorded() {
    let (_, api) = logged_in().await;
    let command = DeviceCommand {
        command_type: "engineStop".to_string(),
        data: HashMap::new(),
    };
    api.send_command(2, &command).await.unwrap();
    assert_eq!(api.sent_commands(), vec![(2, command)]);
}

#[tokio::test]
async fn test_sharing_link_expiry() {
    let (_, api) = logged_in().await;
    let expires = Utc::now() + Duration::hours(2);
    let link = api.create_sharing_link(1, expires).await.unwrap();
    assert!(link.url.starts_with("https://share.flizo.app/demo/1/"));
    assert_eq!(link.expires_at, expires);

    let past = Utc::now() - Duration::minutes(1);
    assert!(matches!(
        api.create_sharing_link(1, past).await,
        Err(ApiError::Service { status: 422, .. })
    ));
}

// ==================== Push registration ====================

#[tokio::test]
async fn test_push_token_queued_until_login() {
    let (session, api) = logged_out();
    let registrar = PushRegistrar::new(api.clone(), session.clone());

    let outcome = registrar.register("fcm-123").await.unwrap();
    assert_eq!(outcome, PushRegistration::Queued);
    assert_eq!(session.get(SessionKey::PendingPushToken).as_deref(), Some("fcm-123"));
    assert!(!registrar.flush().await.unwrap());

    let token = api.login(DEMO_EMAIL, DEMO_PASSWORD).await.unwrap();
    session.begin(&token, false).unwrap();

    assert!(registrar.flush().await.unwrap());
    assert_eq!(api.registered_push_tokens(), vec!["fcm-123".to_string()]);
    assert_eq!(session.get(SessionKey::PendingPushToken), None);
    assert!(!registrar.flush().await.unwrap());
}

#[tokio::test]
async fn test_push_token_forwarded_when_logged_in() {
    let (session, api) = logged_in().await;
    let registrar = PushRegistrar::new(api.clone(), session.clone());

    let outcome = registrar.register("fcm-456").await.unwrap();
    assert_eq!(outcome, PushRegistration::Registered);
    assert_eq!(api.registered_push_tokens(), vec!["fcm-456".to_string()]);
    assert_eq!(session.get(SessionKey::PendingPushToken), None);
}

#[tokio::test]
async fn test_failed_push_forward_requeues() {
    let (session, api) = logged_in().await;
    let registrar = PushRegistrar::new(api.clone(), session.clone());
    api.fail_push_registration(true);

    assert!(registrar.register("fcm-789").await.is_err());
    assert_eq!(session.get(SessionKey::PendingPushToken).as_deref(), Some("fcm-789"));

    api.fail_push_registration(false);
    assert!(registrar.flush().await.unwrap());
    assert_eq!(api.registered_push_tokens(), vec!["fcm-789".to_string()]);
}

#[tokio::test]
async fn test_pending_push_token_survives_logout() {
    let (session, api) = logged_in().await;
    let registrar = PushRegistrar::new(api.clone(), session.clone());
    api.fail_push_registration(true);
    let _ = registrar.register("fcm-keep").await;

    session.end().unwrap();
    assert!(!session.is_authenticated());
    assert_eq!(session.get(SessionKey::PendingPushToken).as_deref(), Some("fcm-keep"));
}
