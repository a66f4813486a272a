#![allow(dead_code)]

use async_trait::async_trait;
use mixtape::api::models::{AlbumRef, ArtistRef, Image, Track};
use mixtape::clock::{Clock, ManualClock};
use mixtape::config::{AuthSettings, EndOfQueue, SessionSettings};
use mixtape::error::{AppError, AppResult};
use mixtape::playback::backend::{
    BackendEvent, BackendKind, Capabilities, EventEmitter, EventReceiver, PlaybackBackend,
    StampedEvent,
};
use mixtape::playback::embedded::{embed_channel, EmbedEventSender, EmbeddedMediaBackend, EmbeddedPlayer};
use mixtape::playback::preview::{media_channel, MediaElement, MediaEventSender, PreviewClipBackend};
use mixtape::session::SessionController;
use mixtape::storage::{KeyValueStore, MemoryStore, ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY};
use mixtape::token_store::{RefreshPolicy, TokenStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn track(id: &str) -> Track {
    Track {
        id: id.to_string(),
        title: format!("Song {}", id.to_uppercase()),
        artists: vec![ArtistRef {
            id: Some(format!("artist-{}", id)),
            name: "The Testers".into(),
        }],
        album: AlbumRef {
            id: None,
            name: "Fixtures".into(),
            images: vec![Image {
                url: format!("https://img.example/{}.jpg", id),
                height: Some(300),
                width: Some(300),
            }],
        },
        duration_ms: 180_000,
        uri: format!("catalog:track:{}", id),
        preview_url: Some(format!("https://preview.example/{}.mp3", id)),
    }
}

pub fn track_without_preview(id: &str) -> Track {
    Track {
        preview_url: None,
        ..track(id)
    }
}

pub fn tracks(ids: &[&str]) -> Vec<Track> {
    ids.iter().map(|id| track(id)).collect()
}

pub fn auth_settings(token_url: &str, refresh_policy: RefreshPolicy) -> AuthSettings {
    AuthSettings {
        client_id: "test-client".into(),
        redirect_uri: "http://127.0.0.1:8888/callback".into(),
        authorize_url: "https://accounts.example.com/authorize".into(),
        token_url: token_url.to_string(),
        scopes: vec!["streaming".into(), "user-read-email".into()],
        refresh_policy,
    }
}

pub fn stored_credential(
    clock: &ManualClock,
    ttl: chrono::Duration,
    refresh_token: Option<&str>,
) -> MemoryStore {
    let mut storage = MemoryStore::new();
    storage.set(ACCESS_TOKEN_KEY, "access-1").unwrap();
    storage
        .set(EXPIRES_AT_KEY, &(clock.now() + ttl).to_rfc3339())
        .unwrap();
    if let Some(rt) = refresh_token {
        storage.set(REFRESH_TOKEN_KEY, rt).unwrap();
    }
    storage
}

/// A signed-in token store whose clock the test controls.
pub fn signed_in(ttl: chrono::Duration) -> (Arc<TokenStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let storage = stored_credential(&clock, ttl, None);
    let tokens = TokenStore::new(
        reqwest::Client::new(),
        auth_settings("http://127.0.0.1:9/api/token", RefreshPolicy::Never),
        Box::new(storage),
        clock.clone(),
    );
    (Arc::new(tokens), clock)
}

pub fn session_settings(end_of_queue: EndOfQueue) -> SessionSettings {
    SessionSettings {
        end_of_queue,
        progress_tick: Duration::from_secs(1),
    }
}

pub fn controller(end_of_queue: EndOfQueue) -> (SessionController, Arc<TokenStore>, Arc<ManualClock>) {
    let (tokens, clock) = signed_in(chrono::Duration::hours(1));
    let controller = SessionController::new(tokens.clone(), session_settings(end_of_queue));
    (controller, tokens, clock)
}

pub async fn recv(rx: &mut EventReceiver) -> StampedEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a backend event")
        .expect("backend event stream closed")
}

/// Feed the next backend event through the controller.
pub async fn pump_one(controller: &mut SessionController, rx: &mut EventReceiver) -> BackendEvent {
    let stamped = recv(rx).await;
    let event = stamped.event.clone();
    controller.handle_event(stamped).await;
    event
}

/// Records every call made on a media element.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub struct FakeElement {
    log: CallLog,
}

#[async_trait]
impl MediaElement for FakeElement {
    async fn set_source(&mut self, url: &str) -> AppResult<()> {
        self.log.push(format!("source:{}", url));
        Ok(())
    }

    async fn play(&mut self) -> AppResult<()> {
        self.log.push("play");
        Ok(())
    }

    async fn pause(&mut self) -> AppResult<()> {
        self.log.push("pause");
        Ok(())
    }

    async fn set_position(&mut self, position_ms: u64) -> AppResult<()> {
        self.log.push(format!("position:{}", position_ms));
        Ok(())
    }

    async fn release(&mut self) {
        self.log.push("release");
    }
}

pub fn preview_backend() -> (PreviewClipBackend, CallLog, MediaEventSender) {
    let log = CallLog::default();
    let (tx, rx) = media_channel();
    let backend = PreviewClipBackend::new(Box::new(FakeElement { log: log.clone() }), rx);
    (backend, log, tx)
}

/// Records every call made on an embedded player.
pub struct FakePlayer {
    log: CallLog,
}

#[async_trait]
impl EmbeddedPlayer for FakePlayer {
    async fn mount(&mut self, video_id: &str) -> AppResult<()> {
        self.log.push(format!("mount:{}", video_id));
        Ok(())
    }

    async fn play_video(&mut self) -> AppResult<()> {
        self.log.push("play_video");
        Ok(())
    }

    async fn pause_video(&mut self) -> AppResult<()> {
        self.log.push("pause_video");
        Ok(())
    }

    async fn seek_to(&mut self, position_ms: u64) -> AppResult<()> {
        self.log.push(format!("seek_to:{}", position_ms));
        Ok(())
    }

    async fn destroy(&mut self) {
        self.log.push("destroy");
    }
}

pub fn embedded_backend() -> (EmbeddedMediaBackend, CallLog, EmbedEventSender) {
    let log = CallLog::default();
    let (tx, rx) = embed_channel();
    let backend = EmbeddedMediaBackend::new(Box::new(FakePlayer { log: log.clone() }), rx);
    (backend, log, tx)
}

/// Controller with a connected preview backend whose readiness has been processed.
pub async fn ready_preview_session(
    end_of_queue: EndOfQueue,
) -> (
    SessionController,
    EventReceiver,
    CallLog,
    MediaEventSender,
    Arc<TokenStore>,
    Arc<ManualClock>,
) {
    let (mut controller, tokens, clock) = controller(end_of_queue);
    let (backend, log, media) = preview_backend();
    let mut rx = controller.install_backend(Box::new(backend)).await.unwrap();
    let event = pump_one(&mut controller, &mut rx).await;
    assert_eq!(event, BackendEvent::ReadinessChanged(true));
    (controller, rx, log, media, tokens, clock)
}

/// Test handle onto a [`FakeBackend`]: inspect calls, push events.
#[derive(Clone, Default)]
pub struct Probe {
    log: CallLog,
    emitter: Arc<Mutex<Option<EventEmitter>>>,
    unplayable: Arc<Mutex<HashSet<String>>>,
}

impl Probe {
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn emit(&self, event: BackendEvent) {
        let emitter = self.emitter.lock().unwrap();
        emitter
            .as_ref()
            .expect("backend not connected")
            .emit(event);
    }

    pub fn mark_unplayable(&self, id: &str) {
        self.unplayable.lock().unwrap().insert(id.to_string());
    }
}

/// Scripted backend with configurable capabilities.
pub struct FakeBackend {
    capabilities: Capabilities,
    probe: Probe,
}

impl FakeBackend {
    pub fn new(capabilities: Capabilities) -> (Self, Probe) {
        let probe = Probe::default();
        (
            Self {
                capabilities,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

#[async_trait]
impl PlaybackBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn connect(&mut self, events: EventEmitter) -> AppResult<()> {
        self.probe.log.push("connect");
        *self.probe.emitter.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn prepare(&mut self, track: &Track) -> AppResult<()> {
        self.probe.log.push(format!("prepare:{}", track.id));
        if self.probe.unplayable.lock().unwrap().contains(&track.id) {
            return Err(AppError::Unplayable(track.id.clone()));
        }
        Ok(())
    }

    async fn play(&mut self) -> AppResult<()> {
        self.probe.log.push("play");
        Ok(())
    }

    async fn pause(&mut self) -> AppResult<()> {
        self.probe.log.push("pause");
        Ok(())
    }

    async fn seek(&mut self, position_ms: u64) -> AppResult<()> {
        self.probe.log.push(format!("seek:{}", position_ms));
        Ok(())
    }

    async fn dispose(&mut self) {
        self.probe.log.push("dispose");
    }
}
