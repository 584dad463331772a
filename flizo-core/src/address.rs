//! Address resolution for trip point groups
//!
//! One reverse-geocode lookup per group, using the group's first point. Every
//! failure except [`ApiError::Unauthorized`] degrades to "no address"; the
//! caller shows [`crate::model::ADDRESS_UNAVAILABLE`] instead.

use crate::api::TrackingApi;
use crate::error::ApiError;
use crate::model::TripPointGroup;
use crate::normalize::ZeroCoordinatePolicy;
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

/// Text the geocoder returns when it has nothing for a position
pub const NO_ADDRESS_SENTINEL: &str = "-";

/// Strip sentinel and blank responses
pub fn clean_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == NO_ADDRESS_SENTINEL {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Clone)]
pub struct AddressResolver {
    api: Arc<dyn TrackingApi>,
    policy: ZeroCoordinatePolicy,
}

impl AddressResolver {
    /// Resolver that treats an exact `(0, 0)` as an invalid position
    pub fn new(api: Arc<dyn TrackingApi>) -> Self {
        Self {
            api,
            policy: ZeroCoordinatePolicy::Reject,
        }
    }

    pub fn with_policy(mut self, policy: ZeroCoordinatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn resolve(&self, latitude: f64, longitude: f64) -> Result<Option<String>, ApiError> {
        if !self.policy.admits(latitude, longitude) {
            return Ok(None);
        }

        match self.api.geocode(latitude, longitude).await {
            Ok(Some(raw)) => Ok(clean_address(&raw)),
            Ok(None) => Ok(None),
            Err(ApiError::Unauthorized) => Err(ApiError::Unauthorized),
            Err(e) => {
                debug!("Address lookup for ({}, {}) failed: {}", latitude, longitude, e);
                Ok(None)
            }
        }
    }

    /// Resolve every group concurrently. Result `i` belongs to `groups[i]`.
    pub async fn resolve_groups(&self, groups: &[TripPointGroup]) -> Result<Vec<Option<String>>, ApiError> {
        let lookups = groups.iter().map(|group| async move {
            match group.first_point() {
                Some(point) => self.resolve(point.latitude, point.longitude).await,
                None => Ok(None),
            }
        });

        join_all(lookups).await.into_iter().collect()
    }
}
