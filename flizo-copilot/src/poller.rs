//! Live device poller
//!
//! While a session is active, refreshes the device list every poll interval
//! and keeps the session's cached copy current so the device endpoint can
//! answer when the remote service is briefly unreachable. A 401 clears the
//! session like any other call.

use crate::state::AppState;
use flizo_core::{ApiError, DeviceStatus};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Main poller loop. Returns when the state's shutdown token is cancelled.
pub async fn run(state: AppState) {
    let mut ticker = interval(state.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Device poller started ({:?} interval)", state.config.poll_interval());

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = ticker.tick() => {},
        }

        if !state.session.is_authenticated() {
            continue;
        }

        if let Err(e) = poll_cycle(&state).await {
            warn!("Device poll failed: {}", e);
        }
    }

    info!("Device poller stopped");
}

/// Fetch devices once and cache them
pub async fn poll_cycle(state: &AppState) -> Result<usize, ApiError> {
    match state.api.devices().await {
        Ok(devices) => {
            let moving = devices
                .iter()
                .filter(|d| d.status() == DeviceStatus::Moving)
                .count();
            debug!("Polled {} devices, {} moving", devices.len(), moving);

            if let Err(e) = state.session.cache_devices(&devices) {
                warn!("Failed to cache devices: {}", e);
            }
            Ok(devices.len())
        }
        Err(ApiError::Unauthorized) => {
            state.invalidate_session().await;
            Err(ApiError::Unauthorized)
        }
        Err(e) => Err(e),
    }
}
