//! Preview clips on a local media element.

use crate::api::models::Track;
use crate::error::{AppError, AppResult};
use crate::playback::backend::{
    BackendErrorKind, BackendEvent, BackendKind, BackendState, Capabilities, EventEmitter,
    PlaybackBackend, SourceLoad, SurfaceEvents, SurfaceSender,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// The audio element the host provides.
#[async_trait]
pub trait MediaElement: Send {
    async fn set_source(&mut self, url: &str) -> AppResult<()>;
    async fn play(&mut self) -> AppResult<()>;
    async fn pause(&mut self) -> AppResult<()>;
    async fn set_position(&mut self, position_ms: u64) -> AppResult<()>;
    /// Stop and detach; the element is not used afterwards.
    async fn release(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    LoadedMetadata { duration_ms: u64 },
    TimeUpdate { position_ms: u64 },
    Playing,
    Paused,
    Ended,
    Error(String),
}

pub type MediaEventSender = SurfaceSender<MediaEvent>;

/// Pair the host's element callbacks with a [`PreviewClipBackend`].
pub fn media_channel() -> (MediaEventSender, SurfaceEvents<MediaEvent>) {
    SurfaceEvents::channel()
}

#[derive(Debug, Clone, Default)]
struct ClipState {
    paused: bool,
    position_ms: u64,
    duration_ms: u64,
    track_id: Option<String>,
}

impl ClipState {
    fn snapshot(&self) -> BackendState {
        BackendState {
            paused: self.paused,
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
            track_id: self.track_id.clone(),
        }
    }
}

pub struct PreviewClipBackend {
    element: Box<dyn MediaElement>,
    media_events: Option<SurfaceEvents<MediaEvent>>,
    source: SourceLoad,
    state: Arc<Mutex<ClipState>>,
    pump: Option<JoinHandle<()>>,
    loaded: bool,
    disposed: bool,
}

impl PreviewClipBackend {
    pub fn new(
        element: Box<dyn MediaElement>,
        media_events: SurfaceEvents<MediaEvent>,
    ) -> Self {
        Self {
            element,
            source: media_events.source_load(),
            media_events: Some(media_events),
            state: Arc::new(Mutex::new(ClipState {
                paused: true,
                ..ClipState::default()
            })),
            pump: None,
            loaded: false,
            disposed: false,
        }
    }

    fn ensure_live(&self) -> AppResult<()> {
        if self.disposed {
            Err(AppError::NotReady)
        } else {
            Ok(())
        }
    }
}

async fn pump_media(
    mut media_events: SurfaceEvents<MediaEvent>,
    state: Arc<Mutex<ClipState>>,
    events: EventEmitter,
) {
    while let Some((event, current)) = media_events.recv().await {
        if !current {
            log::debug!("[preview] dropping {:?} from a replaced clip", event);
            continue;
        }
        let update = {
            let mut clip = state.lock().unwrap_or_else(|e| e.into_inner());
            match event {
                // The element's metadata is authoritative for clip length.
                MediaEvent::LoadedMetadata { duration_ms } => {
                    clip.duration_ms = duration_ms;
                    Some(clip.snapshot())
                }
                MediaEvent::TimeUpdate { position_ms } => {
                    clip.position_ms = position_ms;
                    Some(clip.snapshot())
                }
                MediaEvent::Playing => {
                    clip.paused = false;
                    Some(clip.snapshot())
                }
                MediaEvent::Paused => {
                    clip.paused = true;
                    Some(clip.snapshot())
                }
                MediaEvent::Ended => {
                    clip.paused = true;
                    clip.position_ms = clip.duration_ms;
                    let track_id = clip.track_id.clone();
                    drop(clip);
                    events.emit(BackendEvent::Ended { track_id });
                    None
                }
                MediaEvent::Error(message) => {
                    clip.paused = true;
                    drop(clip);
                    log::warn!("Preview element error: {}", message);
                    events.emit(BackendEvent::Error {
                        kind: BackendErrorKind::Media,
                        message,
                    });
                    None
                }
            }
        };
        if let Some(snapshot) = update {
            events.emit(BackendEvent::StateChanged(snapshot));
        }
    }
}

#[async_trait]
impl PlaybackBackend for PreviewClipBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Preview
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            seek: true,
            pushes_position: true,
        }
    }

    async fn connect(&mut self, events: EventEmitter) -> AppResult<()> {
        let media_events = self
            .media_events
            .take()
            .ok_or_else(|| AppError::Load("preview backend already connected".into()))?;
        self.pump = Some(tokio::spawn(pump_media(
            media_events,
            Arc::clone(&self.state),
            events.clone(),
        )));
        // A local element accepts commands as soon as it exists.
        events.emit(BackendEvent::ReadinessChanged(true));
        Ok(())
    }

    async fn prepare(&mut self, track: &Track) -> AppResult<()> {
        self.ensure_live()?;
        let url = match track.preview_url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => {
                log::warn!("[preview] {} has no preview clip", track.id);
                return Err(AppError::Unplayable(track.id.clone()));
            }
        };
        self.source.bump();
        self.element.set_source(url).await?;
        {
            let mut clip = self.state.lock().unwrap_or_else(|e| e.into_inner());
            *clip = ClipState {
                paused: true,
                position_ms: 0,
                duration_ms: 0,
                track_id: Some(track.id.clone()),
            };
        }
        self.loaded = true;
        log::info!("[preview] loaded clip for {}", track.id);
        Ok(())
    }

    async fn play(&mut self) -> AppResult<()> {
        self.ensure_live()?;
        if !self.loaded {
            return Err(AppError::Load("no clip loaded".into()));
        }
        self.element.play().await
    }

    async fn pause(&mut self) -> AppResult<()> {
        self.ensure_live()?;
        self.element.pause().await
    }

    async fn seek(&mut self, position_ms: u64) -> AppResult<()> {
        self.ensure_live()?;
        if !self.loaded {
            return Ok(());
        }
        self.element.set_position(position_ms).await
    }

    async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.element.release().await;
        log::info!("Preview backend disposed");
    }
}
