//! The playback session state machine.
//!
//! Every user intent and every backend event passes through one
//! `SessionController`, one at a time. Intents are checked against readiness
//! and the credential before anything is touched; the queue cursor moves only
//! once the backend has accepted both `prepare` and `play`.

use crate::api::models::Track;
use crate::config::{EndOfQueue, SessionSettings};
use crate::error::{AppError, AppResult};
use crate::events::{ProgressPayload, SessionEvent, TrackChangedPayload, TransportState};
use crate::playback::backend::{
    BackendErrorKind, BackendEvent, BackendState, Capabilities, EventEmitter, EventReceiver,
    PlaybackBackend, StampedEvent,
};
use crate::playback::progress::ProgressClock;
use crate::playback::queue::QueueModel;
use crate::session::state::{
    PlayContext, PlaybackState, Readiness, SessionSnapshot, SessionStatus, Transport,
};
use crate::token_store::{AuthState, TokenStore};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 64;

pub struct SessionController {
    tokens: Arc<TokenStore>,
    settings: SessionSettings,
    queue: QueueModel,
    backend: Option<Box<dyn PlaybackBackend>>,
    emitter: Option<EventEmitter>,
    /// Generation of the most recent load; older state and end events are stale.
    load_generation: u64,
    playback: PlaybackState,
    progress: ProgressClock,
    /// Last index chosen by the user, where a non-wrapping run stops.
    run_origin: Option<usize>,
    exhausted: bool,
    fault: Option<String>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(tokens: Arc<TokenStore>, settings: SessionSettings) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tokens,
            settings,
            queue: QueueModel::new(),
            backend: None,
            emitter: None,
            load_generation: 0,
            playback: PlaybackState::default(),
            progress: ProgressClock::new(),
            run_origin: None,
            exhausted: false,
            fault: None,
            snapshot_tx,
            events_tx,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn queue(&self) -> &QueueModel {
        &self.queue
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn status(&self) -> SessionStatus {
        if self.fault.is_some() {
            SessionStatus::Error
        } else if self.backend.is_none() {
            SessionStatus::Idle
        } else if self.playback.readiness == Readiness::NotReady {
            SessionStatus::BackendConnecting
        } else if self.queue.is_empty() || self.exhausted {
            SessionStatus::Idle
        } else if self.playback.transport == Transport::Playing {
            SessionStatus::ReadyPlaying
        } else {
            SessionStatus::ReadyPaused
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status(),
            playback: self.playback.clone(),
            cursor: self.queue.cursor(),
            queue_len: self.queue.len(),
            backend: self.backend.as_ref().map(|b| b.kind()),
            fault: self.fault.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events_tx.clone()
    }

    /// Connect a backend, replacing (and disposing) any previous one.
    ///
    /// Requires a valid credential. The returned receiver carries the
    /// backend's events and must be fed back through [`handle_event`].
    ///
    /// [`handle_event`]: SessionController::handle_event
    pub async fn install_backend(
        &mut self,
        mut backend: Box<dyn PlaybackBackend>,
    ) -> AppResult<EventReceiver> {
        self.authorize().await?;
        self.dispose_backend().await;

        let (emitter, rx) = EventEmitter::channel();
        if let Err(e) = backend.connect(emitter.clone()).await {
            log::error!("Failed to connect {:?} backend: {}", backend.kind(), e);
            backend.dispose().await;
            self.fault = Some(e.to_string());
            self.emit(SessionEvent::error(e.kind(), e.to_string()));
            self.publish();
            return Err(e);
        }

        log::info!("{:?} backend installed", backend.kind());
        self.load_generation = emitter.generation();
        self.emitter = Some(emitter);
        self.backend = Some(backend);
        self.fault = None;
        self.exhausted = false;
        self.playback = PlaybackState::default();
        self.publish();
        Ok(rx)
    }

    /// Replace the queue with a browsing selection, optionally starting at `start_index`.
    pub async fn select_queue(
        &mut self,
        tracks: Vec<Track>,
        start_index: Option<usize>,
    ) -> AppResult<()> {
        self.replace_queue(tracks);
        match start_index {
            Some(index) => self.start_run(index).await,
            None => Ok(()),
        }
    }

    /// Play `track` at `index`. With a context whose tracks differ from the
    /// loaded queue, the queue follows the context once the track has loaded;
    /// a failed load leaves the current queue and cursor alone.
    pub async fn play(
        &mut self,
        track: &Track,
        index: usize,
        context: Option<PlayContext>,
    ) -> AppResult<()> {
        self.ensure_ready()?;
        let incoming = context
            .map(PlayContext::into_tracks)
            .filter(|tracks| !self.queue.same_tracks(tracks));
        let candidates = incoming.as_deref().unwrap_or(self.queue.tracks());
        let len = candidates.len();
        let Some(resolved) = resolve_index(candidates, track, index) else {
            return Err(self.reject(AppError::IndexOutOfRange { index, len }).await);
        };

        let Some(tracks) = incoming else {
            return self.start_run(resolved).await;
        };
        let chosen = tracks[resolved].clone();
        self.load_track(&chosen).await?;
        self.replace_queue(tracks);
        self.queue.jump_to(resolved)?;
        self.commit_load(resolved, chosen);
        self.run_origin = Some(resolved);
        Ok(())
    }

    pub async fn play_at(&mut self, index: usize) -> AppResult<()> {
        self.start_run(index).await
    }

    pub async fn toggle_pause(&mut self) -> AppResult<()> {
        self.ensure_ready()?;
        if self.playback.current_track.is_none() {
            return Ok(());
        }
        self.authorize().await?;
        let playing = self.playback.transport == Transport::Playing;
        let result = match self.backend.as_mut() {
            Some(backend) if playing => backend.pause().await,
            Some(backend) => backend.play().await,
            None => Err(AppError::NotReady),
        };
        match result {
            Ok(()) => {
                if !playing {
                    self.exhausted = false;
                }
                Ok(())
            }
            Err(e) => Err(self.reject(e).await),
        }
    }

    pub async fn next(&mut self) -> AppResult<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        self.ensure_ready()?;
        match self.queue.following() {
            Some(index) => self.start_run(index).await,
            None => Ok(()),
        }
    }

    pub async fn previous(&mut self) -> AppResult<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        self.ensure_ready()?;
        match self.queue.preceding() {
            Some(index) => self.start_run(index).await,
            None => Ok(()),
        }
    }

    /// Seek within the current track; a no-op on backends that cannot seek.
    pub async fn seek(&mut self, position_ms: u64) -> AppResult<()> {
        self.ensure_ready()?;
        let caps = self.capabilities();
        if !caps.seek || self.playback.current_track.is_none() {
            return Ok(());
        }
        self.authorize().await?;
        let result = match self.backend.as_mut() {
            Some(backend) => backend.seek(position_ms).await,
            None => Err(AppError::NotReady),
        };
        if let Err(e) = result {
            return Err(self.reject(e).await);
        }
        if !caps.pushes_position {
            let playing = self.playback.transport == Transport::Playing;
            let duration = self.playback.duration_ms;
            self.progress
                .resync(position_ms, duration, playing, Instant::now());
            self.playback.position_ms = self.progress.position_at(Instant::now());
            self.emit(SessionEvent::Progress(ProgressPayload::new(
                self.playback.position_ms,
                duration,
            )));
            self.publish();
        }
        Ok(())
    }

    /// The single reconciliation point for everything a backend reports.
    pub async fn handle_event(&mut self, stamped: StampedEvent) {
        let current = stamped.generation == self.load_generation;
        match stamped.event {
            BackendEvent::ReadinessChanged(ready) => self.set_readiness(ready),
            BackendEvent::StateChanged(state) => {
                if !current || !self.is_current_track(&state) {
                    log::debug!(
                        "Dropping stale state (generation {} vs {})",
                        stamped.generation,
                        self.load_generation
                    );
                    return;
                }
                self.apply_state(state);
            }
            BackendEvent::Ended { track_id } => {
                if !current || !self.is_current_id(track_id.as_deref()) {
                    log::debug!("Dropping stale end of track {:?}", track_id);
                    return;
                }
                self.auto_advance().await;
            }
            BackendEvent::Error { kind, message } => self.on_backend_error(kind, message).await,
        }
    }

    /// React to a credential change observed outside the session.
    pub async fn on_auth_changed(&mut self, state: AuthState) {
        self.emit(SessionEvent::auth(state));
        if state == AuthState::SignedOut && (self.backend.is_some() || !self.queue.is_empty()) {
            log::warn!("Signed out, tearing the session down");
            self.teardown().await;
        }
    }

    /// Whether the driver should keep a position tick running.
    pub fn needs_tick(&self) -> bool {
        self.backend.is_some() && !self.capabilities().pushes_position && self.progress.is_running()
    }

    pub fn on_tick(&mut self) {
        if !self.progress.is_running() {
            return;
        }
        let position = self.progress.position_at(Instant::now());
        self.playback.position_ms = position;
        log::debug!("Interpolated position {}ms", position);
        self.emit(SessionEvent::Progress(ProgressPayload::new(
            position,
            self.playback.duration_ms,
        )));
        self.publish();
    }

    pub async fn shutdown(&mut self) {
        self.dispose_backend().await;
        self.publish();
        log::info!("Session shut down");
    }

    async fn start_run(&mut self, index: usize) -> AppResult<()> {
        self.load_index(index).await?;
        self.run_origin = Some(index);
        Ok(())
    }

    /// Prepare and play the track at `index`, committing the cursor on success.
    async fn load_index(&mut self, index: usize) -> AppResult<()> {
        self.ensure_ready()?;
        let track = match self.queue.get(index) {
            Some(track) => track.clone(),
            None => {
                let err = AppError::IndexOutOfRange {
                    index,
                    len: self.queue.len(),
                };
                return Err(self.reject(err).await);
            }
        };
        self.load_track(&track).await?;
        self.queue.jump_to(index)?;
        self.commit_load(index, track);
        Ok(())
    }

    /// Hand `track` to the backend. Nothing in the session changes on failure.
    async fn load_track(&mut self, track: &Track) -> AppResult<()> {
        self.authorize().await?;

        if let Some(emitter) = &self.emitter {
            self.load_generation = emitter.next_generation();
        }

        let result = match self.backend.as_mut() {
            Some(backend) => match backend.prepare(track).await {
                Ok(()) => backend.play().await,
                Err(e) => Err(e),
            },
            None => Err(AppError::NotReady),
        };

        if let Err(e) = result {
            // Whatever was playing before keeps reporting under a fresh generation.
            if let Some(emitter) = &self.emitter {
                self.load_generation = emitter.next_generation();
            }
            return Err(self.reject(e).await);
        }
        Ok(())
    }

    fn commit_load(&mut self, index: usize, track: Track) {
        self.exhausted = false;
        self.progress.reset();
        self.playback.position_ms = 0;
        self.playback.duration_ms = 0;
        log::info!("Now playing [{}] {} - {}", index, track.artist_names(), track.title);
        self.emit(SessionEvent::TrackChanged(TrackChangedPayload::from_track(
            index, &track,
        )));
        self.playback.current_track = Some(track);
        self.emit(SessionEvent::QueueChanged {
            length: self.queue.len(),
            cursor: Some(index),
        });
        self.publish();
    }

    async fn auto_advance(&mut self) {
        let Some(current) = self.queue.cursor() else {
            return;
        };
        let ended_id = self.playback.current_track.as_ref().map(|t| t.id.clone());
        self.emit(SessionEvent::TrackEnded { track_id: ended_id });
        self.playback.transport = Transport::Paused;
        self.progress.pause(Instant::now());

        let mut candidate = current;
        for _ in 0..self.queue.len() {
            let Some(next) = self.queue.after(candidate) else {
                break;
            };
            if self.settings.end_of_queue == EndOfQueue::Stop && Some(next) == self.run_origin {
                break;
            }
            match self.load_index(next).await {
                Ok(()) => return,
                Err(AppError::Unplayable(id)) => {
                    log::info!("Skipping unplayable track {}", id);
                    candidate = next;
                }
                Err(e) => {
                    log::warn!("Auto-advance stopped: {}", e);
                    self.publish();
                    return;
                }
            }
        }

        log::info!("End of queue reached");
        self.exhausted = true;
        self.emit(SessionEvent::StateChanged {
            state: TransportState::Stopped,
        });
        self.publish();
    }

    fn apply_state(&mut self, state: BackendState) {
        let now = Instant::now();
        let transport = if state.paused {
            Transport::Paused
        } else {
            Transport::Playing
        };
        let transport_changed = transport != self.playback.transport;
        self.playback.transport = transport;
        self.playback.position_ms = state.position_ms;
        if state.duration_ms > 0 {
            self.playback.duration_ms = state.duration_ms;
        }
        if !self.capabilities().pushes_position {
            self.progress.resync(
                state.position_ms,
                self.playback.duration_ms,
                transport == Transport::Playing,
                now,
            );
        }
        if transport == Transport::Playing {
            self.exhausted = false;
        }

        if transport_changed {
            self.emit(SessionEvent::StateChanged {
                state: match transport {
                    Transport::Playing => TransportState::Playing,
                    Transport::Paused => TransportState::Paused,
                },
            });
        }
        self.emit(SessionEvent::Progress(ProgressPayload::new(
            self.playback.position_ms,
            self.playback.duration_ms,
        )));
        self.publish();
    }

    fn set_readiness(&mut self, ready: bool) {
        let readiness = if ready {
            Readiness::Ready
        } else {
            Readiness::NotReady
        };
        if readiness == self.playback.readiness {
            return;
        }
        log::info!("Backend readiness: {:?}", readiness);
        self.playback.readiness = readiness;
        if !ready {
            self.playback.transport = Transport::Paused;
            self.progress.pause(Instant::now());
        }
        self.publish();
    }

    async fn on_backend_error(&mut self, kind: BackendErrorKind, message: String) {
        match kind {
            BackendErrorKind::AuthExpired => {
                log::error!("Backend credential rejected: {}", message);
                self.dispose_backend().await;
                self.fault = Some(message.clone());
                self.tokens.invalidate().await;
                self.emit(SessionEvent::error("auth", message));
            }
            BackendErrorKind::Initialization | BackendErrorKind::Account => {
                log::error!("Backend failed ({:?}): {}", kind, message);
                self.dispose_backend().await;
                self.fault = Some(message.clone());
                self.emit(SessionEvent::error("backend", message));
            }
            BackendErrorKind::NotReady => {
                self.set_readiness(false);
                self.emit(SessionEvent::warning("not_ready", message));
            }
            BackendErrorKind::Unplayable => {
                log::warn!("Current track cannot be played: {}", message);
                self.emit(SessionEvent::warning("unplayable", message));
            }
            BackendErrorKind::Network | BackendErrorKind::Media => {
                log::warn!("Backend error ({:?}): {}", kind, message);
                self.emit(SessionEvent::warning("load", message));
            }
        }
        self.publish();
    }

    fn replace_queue(&mut self, tracks: Vec<Track>) {
        self.queue.replace(tracks);
        self.run_origin = None;
        log::info!("Queue replaced with {} tracks", self.queue.len());
        self.emit(SessionEvent::QueueChanged {
            length: self.queue.len(),
            cursor: None,
        });
        self.publish();
    }

    /// Readiness gate for every intent that would reach the backend. Rejections
    /// are announced so the user is never left guessing.
    fn ensure_ready(&self) -> AppResult<()> {
        if self.backend.is_some() && self.playback.readiness == Readiness::Ready {
            return Ok(());
        }
        log::warn!("Playback backend is not ready");
        self.emit(SessionEvent::warning(
            AppError::NotReady.kind(),
            AppError::NotReady.to_string(),
        ));
        Err(AppError::NotReady)
    }

    /// Ask the token store for a credential right before touching the backend.
    async fn authorize(&mut self) -> AppResult<()> {
        match self.tokens.require().await {
            Ok(_) => Ok(()),
            Err(e) => {
                log::warn!("No usable credential: {}", e);
                self.teardown().await;
                self.emit(SessionEvent::error(e.kind(), e.to_string()));
                Err(e)
            }
        }
    }

    async fn reject(&mut self, err: AppError) -> AppError {
        if err.is_auth() {
            log::error!("Authentication failed: {}", err);
            self.teardown().await;
            self.emit(SessionEvent::error(err.kind(), err.to_string()));
        } else {
            log::warn!("Playback intent rejected: {}", err);
            self.emit(SessionEvent::warning(err.kind(), err.to_string()));
        }
        err
    }

    /// Full stop after losing the credential: nothing from the old session survives.
    async fn teardown(&mut self) {
        self.dispose_backend().await;
        self.queue.replace(Vec::new());
        self.run_origin = None;
        self.exhausted = false;
        self.emit(SessionEvent::QueueChanged {
            length: 0,
            cursor: None,
        });
        self.publish();
    }

    async fn dispose_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.dispose().await;
        }
        self.emitter = None;
        self.progress.reset();
        self.playback = PlaybackState::default();
    }

    fn is_current_track(&self, state: &BackendState) -> bool {
        self.is_current_id(state.track_id.as_deref())
    }

    /// A report without a track id is taken to be about the loaded track.
    fn is_current_id(&self, track_id: Option<&str>) -> bool {
        match (&self.playback.current_track, track_id) {
            (Some(track), Some(id)) => track.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    fn capabilities(&self) -> Capabilities {
        self.backend
            .as_ref()
            .map(|b| b.capabilities())
            .unwrap_or(Capabilities {
                seek: false,
                pushes_position: true,
            })
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

/// `index` when it still points at `track`, otherwise wherever `track` sits.
fn resolve_index(tracks: &[Track], track: &Track, index: usize) -> Option<usize> {
    match tracks.get(index) {
        Some(at) if at.id == track.id => Some(index),
        _ => tracks.iter().position(|t| t.id == track.id),
    }
}
