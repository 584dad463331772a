//! History query orchestration
//!
//! Validates a query, fetches it, installs the resulting view and decorates
//! its groups with addresses in the background. Every query bumps the state's
//! generation counter; results that come back for an older generation are
//! dropped instead of overwriting the newer view.

use crate::state::AppState;
use flizo_core::model::HistorySummary;
use flizo_core::normalize::build_route_path;
use flizo_core::{ApiError, HistoryData, HistoryQuery, PlaybackClock, PlaybackEvent, RoutePath};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Everything the history screen shows for one successful query
pub struct HistoryView {
    pub generation: u64,
    pub query: HistoryQuery,
    pub history: HistoryData,
    pub clock: PlaybackClock,
    /// Set once background address lookups have been applied
    pub addresses_resolved: bool,
}

impl HistoryView {
    pub fn route(&self) -> &RoutePath {
        self.clock.route()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HistoryOutcome {
    Loaded {
        points: usize,
        route_len: usize,
        can_play: bool,
        summary: HistorySummary,
    },
    /// The range holds no points. Not an error; play stays disabled.
    NoData,
    /// A newer query was issued while this one was in flight
    Superseded,
}

/// Run a history query and install its view
pub async fn run_query(state: &AppState, query: HistoryQuery) -> Result<HistoryOutcome, ApiError> {
    query.validate()?;

    let generation = state.next_generation();
    pause_open_view(state).await;

    let history = state.api.history(&query).await?;

    if !state.is_current(generation) {
        debug!("Discarding history for superseded query {}", generation);
        return Ok(HistoryOutcome::Superseded);
    }

    if history.is_empty() {
        info!("History query returned no points");
        state.stop_timer().await;
        if state.view.write().await.take().is_some() {
            state.emit(PlaybackEvent::Stopped);
        }
        return Ok(HistoryOutcome::NoData);
    }

    let route = build_route_path(&history);
    let clock = PlaybackClock::with_duration(route, state.config.playback_duration());
    let outcome = HistoryOutcome::Loaded {
        points: history.point_count(),
        route_len: clock.len(),
        can_play: clock.can_play(),
        summary: history.summary.clone(),
    };

    // Any timer left on the old view goes before the new one becomes visible
    state.stop_timer().await;
    {
        let mut view = state.view.write().await;
        // Re-check under the lock; another query may have started meanwhile
        if !state.is_current(generation) {
            return Ok(HistoryOutcome::Superseded);
        }
        *view = Some(HistoryView {
            generation,
            query,
            history,
            clock,
            addresses_resolved: false,
        });
    }
    state.emit(PlaybackEvent::Stopped);

    tokio::spawn(decorate_addresses(state.clone(), generation));

    Ok(outcome)
}

/// The timer is torn down while a new query runs; leave the clock paused to match
async fn pause_open_view(state: &AppState) {
    state.stop_timer().await;
    let event = {
        let mut view = state.view.write().await;
        view.as_mut().and_then(|v| v.clock.pause())
    };
    if let Some(event) = event {
        state.emit(event);
    }
}

/// Resolve one address per group and write each into its own group
pub async fn decorate_addresses(state: AppState, generation: u64) {
    let groups = {
        let view = state.view.read().await;
        match &*view {
            Some(v) if v.generation == generation => v.history.items.clone(),
            _ => return,
        }
    };

    let addresses = match state.resolver.resolve_groups(&groups).await {
        Ok(addresses) => addresses,
        Err(ApiError::Unauthorized) => {
            warn!("Session rejected during address lookup");
            state.invalidate_session().await;
            return;
        }
        Err(e) => {
            // resolve_groups only surfaces Unauthorized
            warn!("Address lookup failed: {}", e);
            return;
        }
    };

    let mut view = state.view.write().await;
    match view.as_mut() {
        Some(v) if v.generation == generation => {
            for (group, address) in v.history.items.iter_mut().zip(addresses) {
                group.set_address(address);
            }
            v.addresses_resolved = true;
            debug!("Addresses applied to {} groups", v.history.items.len());
        }
        _ => debug!("Discarding addresses for superseded query {}", generation),
    }
}
