//! Application state management

use crate::config::CopilotConfig;
use crate::history::HistoryView;
use crate::playback::PlaybackTimer;
use flizo_core::address::AddressResolver;
use flizo_core::push::PushRegistrar;
use flizo_core::{PlaybackEvent, Session, TrackingApi};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Remote tracking service backend
    pub api: Arc<dyn TrackingApi>,

    pub session: Session,

    pub resolver: AddressResolver,

    pub push: PushRegistrar,

    pub config: Arc<CopilotConfig>,

    /// The open history view (None when no query has produced data)
    pub view: Arc<RwLock<Option<HistoryView>>>,

    /// Bumped by every history query; work tagged with an older value is stale
    pub generation: Arc<AtomicU64>,

    /// Broadcast channel for playback events
    pub playback_tx: broadcast::Sender<PlaybackEvent>,

    /// The single timer driving the open view's clock
    pub timer: Arc<Mutex<Option<PlaybackTimer>>>,

    /// Cancels the device poller on shutdown
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(api: Arc<dyn TrackingApi>, session: Session, config: CopilotConfig) -> Self {
        let (playback_tx, _) = broadcast::channel(256);

        Self {
            resolver: AddressResolver::new(api.clone()),
            push: PushRegistrar::new(api.clone(), session.clone()),
            api,
            session,
            config: Arc::new(config),
            view: Arc::new(RwLock::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            playback_tx,
            timer: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribe to playback events
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.playback_tx.subscribe()
    }

    /// Forward an event to subscribers; nobody listening is fine
    pub fn emit(&self, event: PlaybackEvent) {
        let _ = self.playback_tx.send(event);
    }

    /// Start a new query generation, invalidating all in-flight work
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Replace the playback timer with a fresh one for `generation`
    pub async fn start_timer(&self, generation: u64) {
        let mut timer = self.timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.cancel();
        }
        *timer = Some(PlaybackTimer::start(
            self.view.clone(),
            self.playback_tx.clone(),
            generation,
        ));
    }

    pub async fn stop_timer(&self) {
        let mut timer = self.timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.cancel();
        }
    }

    /// Tear down the open view and its timer. Returns whether one was open.
    pub async fn close_view(&self) -> bool {
        self.next_generation();
        self.stop_timer().await;
        let closed = self.view.write().await.take().is_some();
        if closed {
            self.emit(PlaybackEvent::Stopped);
        }
        closed
    }

    /// Logout, or any 401 from the remote service
    pub async fn invalidate_session(&self) {
        if let Err(e) = self.session.end() {
            warn!("Failed to clear session: {}", e);
        }
        self.close_view().await;
        info!("Session cleared");
    }
}
