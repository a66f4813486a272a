//! Hidden embedded video player standing in for catalog tracks.

use crate::api::models::Track;
use crate::error::{AppError, AppResult};
use crate::playback::backend::{
    BackendErrorKind, BackendEvent, BackendKind, BackendState, Capabilities, EventEmitter,
    PlaybackBackend, SourceLoad, SurfaceEvents, SurfaceSender,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// The embedded player surface the host mounts.
#[async_trait]
pub trait EmbeddedPlayer: Send {
    async fn mount(&mut self, video_id: &str) -> AppResult<()>;
    async fn play_video(&mut self) -> AppResult<()>;
    async fn pause_video(&mut self) -> AppResult<()>;
    async fn seek_to(&mut self, position_ms: u64) -> AppResult<()>;
    async fn destroy(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedEvent {
    ApiReady,
    StateCode(i32),
    Progress { position_ms: u64, duration_ms: u64 },
    Error(i32),
}

pub type EmbedEventSender = SurfaceSender<EmbedEvent>;

/// Pair the host's player callbacks with an [`EmbeddedMediaBackend`].
pub fn embed_channel() -> (EmbedEventSender, SurfaceEvents<EmbedEvent>) {
    SurfaceEvents::channel()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPlayerState {
    Unstarted,
    Ended,
    Playing,
    Paused,
    Buffering,
    Cued,
}

impl EmbedPlayerState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Unstarted),
            0 => Some(Self::Ended),
            1 => Some(Self::Playing),
            2 => Some(Self::Paused),
            3 => Some(Self::Buffering),
            5 => Some(Self::Cued),
            _ => None,
        }
    }

    /// Only an actively playing video counts as unpaused.
    pub fn is_paused(self) -> bool {
        self != Self::Playing
    }

    pub fn is_ended(self) -> bool {
        self == Self::Ended
    }
}

/// Video not found, or embedding disallowed by its owner.
fn error_kind(code: i32) -> BackendErrorKind {
    match code {
        100 | 101 | 150 => BackendErrorKind::Unplayable,
        _ => BackendErrorKind::Media,
    }
}

#[derive(Debug, Default)]
struct EmbedShared {
    ready: bool,
    paused: bool,
    position_ms: u64,
    duration_ms: u64,
    track_id: Option<String>,
}

impl EmbedShared {
    fn snapshot(&self) -> BackendState {
        BackendState {
            paused: self.paused,
            position_ms: self.position_ms,
            duration_ms: self.duration_ms,
            track_id: self.track_id.clone(),
        }
    }
}

pub struct EmbeddedMediaBackend {
    player: Box<dyn EmbeddedPlayer>,
    embed_events: Option<SurfaceEvents<EmbedEvent>>,
    source: SourceLoad,
    shared: Arc<Mutex<EmbedShared>>,
    pump: Option<JoinHandle<()>>,
    mounted: bool,
    disposed: bool,
}

impl EmbeddedMediaBackend {
    pub fn new(
        player: Box<dyn EmbeddedPlayer>,
        embed_events: SurfaceEvents<EmbedEvent>,
    ) -> Self {
        Self {
            player,
            source: embed_events.source_load(),
            embed_events: Some(embed_events),
            shared: Arc::new(Mutex::new(EmbedShared {
                paused: true,
                ..EmbedShared::default()
            })),
            pump: None,
            mounted: false,
            disposed: false,
        }
    }

    fn ensure_ready(&self) -> AppResult<()> {
        let ready = self.shared.lock().unwrap_or_else(|e| e.into_inner()).ready;
        if self.disposed || !ready {
            Err(AppError::NotReady)
        } else {
            Ok(())
        }
    }
}

async fn pump_embed(
    mut embed_events: SurfaceEvents<EmbedEvent>,
    shared: Arc<Mutex<EmbedShared>>,
    events: EventEmitter,
) {
    while let Some((event, current)) = embed_events.recv().await {
        // Readiness belongs to the player, everything else to one video.
        if !current && event != EmbedEvent::ApiReady {
            log::debug!("[embedded] dropping {:?} from a replaced video", event);
            continue;
        }
        match event {
            EmbedEvent::ApiReady => {
                shared.lock().unwrap_or_else(|e| e.into_inner()).ready = true;
                log::info!("Embedded player API ready");
                events.emit(BackendEvent::ReadinessChanged(true));
            }
            EmbedEvent::StateCode(code) => {
                let Some(state) = EmbedPlayerState::from_code(code) else {
                    log::debug!("Ignoring unknown embed state code {}", code);
                    continue;
                };
                let snapshot = {
                    let mut embed = shared.lock().unwrap_or_else(|e| e.into_inner());
                    embed.paused = state.is_paused();
                    if state.is_ended() && embed.duration_ms > 0 {
                        embed.position_ms = embed.duration_ms;
                    }
                    embed.snapshot()
                };
                let track_id = snapshot.track_id.clone();
                events.emit(BackendEvent::StateChanged(snapshot));
                if state.is_ended() {
                    events.emit(BackendEvent::Ended { track_id });
                }
            }
            EmbedEvent::Progress {
                position_ms,
                duration_ms,
            } => {
                let snapshot = {
                    let mut embed = shared.lock().unwrap_or_else(|e| e.into_inner());
                    embed.position_ms = position_ms;
                    if duration_ms > 0 {
                        embed.duration_ms = duration_ms;
                    }
                    embed.snapshot()
                };
                events.emit(BackendEvent::StateChanged(snapshot));
            }
            EmbedEvent::Error(code) => {
                let kind = error_kind(code);
                log::warn!("Embedded player error {} ({:?})", code, kind);
                events.emit(BackendEvent::Error {
                    kind,
                    message: format!("embedded player error {}", code),
                });
            }
        }
    }
}

#[async_trait]
impl PlaybackBackend for EmbeddedMediaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            seek: true,
            pushes_position: true,
        }
    }

    async fn connect(&mut self, events: EventEmitter) -> AppResult<()> {
        let embed_events = self
            .embed_events
            .take()
            .ok_or_else(|| AppError::Load("embedded backend already connected".into()))?;
        self.pump = Some(tokio::spawn(pump_embed(
            embed_events,
            Arc::clone(&self.shared),
            events,
        )));
        Ok(())
    }

    async fn prepare(&mut self, track: &Track) -> AppResult<()> {
        self.ensure_ready()?;
        if track.uri.is_empty() {
            return Err(AppError::Unplayable(track.id.clone()));
        }
        self.source.bump();
        self.player.mount(&track.uri).await?;
        {
            let mut embed = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            embed.paused = true;
            embed.position_ms = 0;
            // Surrogate durations are often unknown until the player reports them.
            embed.duration_ms = track.duration_ms;
            embed.track_id = Some(track.id.clone());
        }
        self.mounted = true;
        log::info!("[embedded] mounted video {} for {}", track.uri, track.id);
        Ok(())
    }

    async fn play(&mut self) -> AppResult<()> {
        self.ensure_ready()?;
        if !self.mounted {
            return Err(AppError::Load("no video mounted".into()));
        }
        self.player.play_video().await
    }

    async fn pause(&mut self) -> AppResult<()> {
        self.ensure_ready()?;
        self.player.pause_video().await
    }

    async fn seek(&mut self, position_ms: u64) -> AppResult<()> {
        self.ensure_ready()?;
        if !self.mounted {
            return Ok(());
        }
        self.player.seek_to(position_ms).await
    }

    async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).ready = false;
        self.player.destroy().await;
        log::info!("Embedded backend disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_playing_is_unpaused() {
        for code in [-1, 0, 2, 3, 5] {
            let state = EmbedPlayerState::from_code(code).unwrap();
            assert!(state.is_paused(), "code {} should be paused", code);
        }
        assert!(!EmbedPlayerState::from_code(1).unwrap().is_paused());
        assert!(EmbedPlayerState::from_code(4).is_none());
    }

    #[test]
    fn ended_is_only_code_zero() {
        assert!(EmbedPlayerState::from_code(0).unwrap().is_ended());
        assert!(!EmbedPlayerState::from_code(2).unwrap().is_ended());
    }

    #[test]
    fn embedding_refusals_are_unplayable() {
        assert_eq!(error_kind(150), BackendErrorKind::Unplayable);
        assert_eq!(error_kind(101), BackendErrorKind::Unplayable);
        assert_eq!(error_kind(100), BackendErrorKind::Unplayable);
        assert_eq!(error_kind(5), BackendErrorKind::Media);
    }

    #[tokio::test]
    async fn ended_code_raises_state_then_ended() {
        let (emitter, mut rx) = EventEmitter::channel();
        let (tx, embed_rx) = embed_channel();
        let shared = Arc::new(Mutex::new(EmbedShared {
            track_id: Some("v1".into()),
            ..EmbedShared::default()
        }));
        let pump = tokio::spawn(pump_embed(embed_rx, shared, emitter));

        assert!(tx.send(EmbedEvent::StateCode(1)));
        assert!(tx.send(EmbedEvent::StateCode(0)));
        drop(tx);
        pump.await.unwrap();

        let playing = rx.recv().await.unwrap().event;
        assert!(matches!(playing, BackendEvent::StateChanged(ref s) if !s.paused));
        let stopped = rx.recv().await.unwrap().event;
        assert!(matches!(stopped, BackendEvent::StateChanged(ref s) if s.paused));
        assert_eq!(
            rx.recv().await.unwrap().event,
            BackendEvent::Ended {
                track_id: Some("v1".into())
            }
        );
    }
}
