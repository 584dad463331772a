//! Push-notification token registration
//!
//! Platform registration can finish before the user has logged in. In that
//! case the token is parked in the session and forwarded by [`PushRegistrar::flush`]
//! on the next login.

use crate::api::TrackingApi;
use crate::error::ApiError;
use crate::session::{Session, SessionKey};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRegistration {
    /// Forwarded to the tracking service
    Registered,
    /// No session yet; kept until the next login
    Queued,
}

#[derive(Clone)]
pub struct PushRegistrar {
    api: Arc<dyn TrackingApi>,
    session: Session,
}

impl PushRegistrar {
    pub fn new(api: Arc<dyn TrackingApi>, session: Session) -> Self {
        Self { api, session }
    }

    pub async fn register(&self, push_token: &str) -> Result<PushRegistration, ApiError> {
        if !self.session.is_authenticated() {
            self.queue(push_token);
            info!("Push token queued until login");
            return Ok(PushRegistration::Queued);
        }

        match self.api.register_push_token(push_token).await {
            Ok(()) => Ok(PushRegistration::Registered),
            Err(e) => {
                self.queue(push_token);
                Err(e)
            }
        }
    }

    /// Forward a queued token, if any. Returns whether one was sent.
    pub async fn flush(&self) -> Result<bool, ApiError> {
        let Some(pending) = self.session.get(SessionKey::PendingPushToken) else {
            return Ok(false);
        };
        if !self.session.is_authenticated() {
            return Ok(false);
        }

        self.api.register_push_token(&pending).await?;
        if let Err(e) = self.session.remove(SessionKey::PendingPushToken) {
            warn!("Failed to clear pending push token: {}", e);
        }
        info!("Queued push token forwarded");
        Ok(true)
    }

    fn queue(&self, push_token: &str) {
        if let Err(e) = self.session.set(SessionKey::PendingPushToken, push_token) {
            warn!("Failed to queue push token: {}", e);
        }
    }
}
