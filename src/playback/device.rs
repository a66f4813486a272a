//! Full-track playback on a remote device session.
//!
//! The device itself is created out of band (by the streaming SDK in the host)
//! and announced through a [`DeviceLink`]. Transport commands go over the Web
//! API and are addressed to the announced device id.

use crate::api::client::WebApiClient;
use crate::api::models::Track;
use crate::error::{AppError, AppResult};
use crate::playback::backend::{
    BackendErrorKind, BackendEvent, BackendKind, BackendState, Capabilities, EventEmitter,
    PlaybackBackend,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Player state as the SDK reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePlayerState {
    pub paused: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub track_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSignal {
    Ready { device_id: String },
    NotReady { device_id: String },
    /// `None` when playback moved to another device.
    PlayerState(Option<RemotePlayerState>),
    InitializationError(String),
    AuthenticationError(String),
    AccountError(String),
    PlaybackError(String),
}

/// Backend side of the SDK bridge.
pub struct DeviceLink {
    signals: mpsc::UnboundedReceiver<DeviceSignal>,
    disconnect: watch::Sender<bool>,
}

/// Host side of the SDK bridge: pushes signals, learns about disconnection.
#[derive(Clone)]
pub struct DeviceLinkHandle {
    player_name: String,
    signals: mpsc::UnboundedSender<DeviceSignal>,
    disconnected: watch::Receiver<bool>,
}

impl DeviceLink {
    /// `player_name` is what the SDK player registers itself as, and what the
    /// user sees in their list of devices.
    pub fn channel(player_name: impl Into<String>) -> (DeviceLink, DeviceLinkHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (disconnect, disconnected) = watch::channel(false);
        (
            DeviceLink {
                signals: rx,
                disconnect,
            },
            DeviceLinkHandle {
                player_name: player_name.into(),
                signals: tx,
                disconnected,
            },
        )
    }
}

impl DeviceLinkHandle {
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    /// Returns false once the backend side is gone.
    pub fn send(&self, signal: DeviceSignal) -> bool {
        self.signals.send(signal).is_ok()
    }

    /// Whether the backend asked the SDK player to disconnect.
    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.borrow()
    }

    pub async fn wait_disconnected(&mut self) {
        while !*self.disconnected.borrow_and_update() {
            if self.disconnected.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct DeviceBackend {
    api: Arc<WebApiClient>,
    link: Option<DeviceLink>,
    disconnect: Option<watch::Sender<bool>>,
    device_id: Arc<Mutex<Option<String>>>,
    pump: Option<JoinHandle<()>>,
    disposed: bool,
}

impl DeviceBackend {
    pub fn new(api: Arc<WebApiClient>, link: DeviceLink) -> Self {
        Self {
            api,
            link: Some(link),
            disconnect: None,
            device_id: Arc::new(Mutex::new(None)),
            pump: None,
            disposed: false,
        }
    }

    pub fn device_id(&self) -> Option<String> {
        self.device_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn ready_device(&self) -> AppResult<String> {
        if self.disposed {
            return Err(AppError::NotReady);
        }
        self.device_id().ok_or(AppError::NotReady)
    }
}

/// A 404 from the player endpoints means the device is unknown to the server.
fn map_remote_error(err: AppError) -> AppError {
    match err {
        AppError::NotFound(message) => {
            log::warn!("Remote device not found: {}", message);
            AppError::NotReady
        }
        other => other,
    }
}

/// The SDK has no end-of-track signal: a track that was playing and comes back
/// paused at zero on the same item has finished.
fn is_track_end(previous: Option<&RemotePlayerState>, next: &RemotePlayerState) -> bool {
    match previous {
        Some(prev) => {
            !prev.paused
                && prev.position_ms > 0
                && next.paused
                && next.position_ms == 0
                && prev.track_id == next.track_id
        }
        None => false,
    }
}

async fn pump_signals(
    mut signals: mpsc::UnboundedReceiver<DeviceSignal>,
    device_id: Arc<Mutex<Option<String>>>,
    events: EventEmitter,
) {
    let mut last_state: Option<RemotePlayerState> = None;
    while let Some(signal) = signals.recv().await {
        match signal {
            DeviceSignal::Ready { device_id: id } => {
                log::info!("Device ready: {}", id);
                *device_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
                events.emit(BackendEvent::ReadinessChanged(true));
            }
            DeviceSignal::NotReady { device_id: id } => {
                log::warn!("Device went offline: {}", id);
                *device_id.lock().unwrap_or_else(|e| e.into_inner()) = None;
                events.emit(BackendEvent::ReadinessChanged(false));
            }
            DeviceSignal::PlayerState(None) => {
                log::debug!("Player state cleared");
                last_state = None;
            }
            DeviceSignal::PlayerState(Some(state)) => {
                let ended = is_track_end(last_state.as_ref(), &state);
                events.emit(BackendEvent::StateChanged(BackendState {
                    paused: state.paused,
                    position_ms: state.position_ms,
                    duration_ms: state.duration_ms,
                    track_id: state.track_id.clone(),
                }));
                if ended {
                    events.emit(BackendEvent::Ended {
                        track_id: state.track_id.clone(),
                    });
                }
                last_state = Some(state);
            }
            DeviceSignal::InitializationError(message) => {
                log::error!("Failed to initialize: {}", message);
                events.emit(BackendEvent::Error {
                    kind: BackendErrorKind::Initialization,
                    message,
                });
            }
            DeviceSignal::AuthenticationError(message) => {
                log::error!("Failed to authenticate: {}", message);
                events.emit(BackendEvent::Error {
                    kind: BackendErrorKind::AuthExpired,
                    message,
                });
            }
            DeviceSignal::AccountError(message) => {
                log::error!("Failed to validate account: {}", message);
                events.emit(BackendEvent::Error {
                    kind: BackendErrorKind::Account,
                    message,
                });
            }
            DeviceSignal::PlaybackError(message) => {
                log::warn!("Playback error: {}", message);
                events.emit(BackendEvent::Error {
                    kind: BackendErrorKind::Media,
                    message,
                });
            }
        }
    }
    log::debug!("Device signal stream ended");
}

#[async_trait]
impl PlaybackBackend for DeviceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            seek: true,
            pushes_position: false,
        }
    }

    async fn connect(&mut self, events: EventEmitter) -> AppResult<()> {
        let link = self
            .link
            .take()
            .ok_or_else(|| AppError::Load("device backend already connected".into()))?;
        self.disconnect = Some(link.disconnect);
        self.pump = Some(tokio::spawn(pump_signals(
            link.signals,
            Arc::clone(&self.device_id),
            events,
        )));
        log::info!("Device backend connected, waiting for device");
        Ok(())
    }

    async fn prepare(&mut self, track: &Track) -> AppResult<()> {
        let device = self.ready_device()?;
        if track.uri.is_empty() {
            return Err(AppError::Unplayable(track.id.clone()));
        }
        log::info!("[device] loading {} on {}", track.uri, device);
        self.api
            .start_playback(&device, std::slice::from_ref(&track.uri))
            .await
            .map_err(map_remote_error)
    }

    async fn play(&mut self) -> AppResult<()> {
        let device = self.ready_device()?;
        self.api
            .resume_playback(&device)
            .await
            .map_err(map_remote_error)
    }

    async fn pause(&mut self) -> AppResult<()> {
        let device = self.ready_device()?;
        self.api
            .pause_playback(&device)
            .await
            .map_err(map_remote_error)
    }

    async fn seek(&mut self, position_ms: u64) -> AppResult<()> {
        let device = self.ready_device()?;
        self.api
            .seek_playback(&device, position_ms)
            .await
            .map_err(map_remote_error)
    }

    async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(disconnect) = self.disconnect.take() {
            let _ = disconnect.send(true);
        }
        *self.device_id.lock().unwrap_or_else(|e| e.into_inner()) = None;
        log::info!("Device backend disposed");
    }
}
