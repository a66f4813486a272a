//! Uniform control surface over the playback technologies.

use crate::api::models::Track;
use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Full-track streaming on a remote device session.
    Device,
    /// Short preview clip on a local media element.
    Preview,
    /// Hidden embedded video player standing in for the track.
    Embedded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub seek: bool,
    /// False when position only arrives with discrete state changes and has to
    /// be interpolated between them.
    pub pushes_position: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendState {
    pub paused: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub track_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    AuthExpired,
    NotReady,
    Unplayable,
    Network,
    Initialization,
    Account,
    Media,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    ReadinessChanged(bool),
    StateChanged(BackendState),
    /// The track that finished, when the backend knows it.
    Ended {
        track_id: Option<String>,
    },
    Error {
        kind: BackendErrorKind,
        message: String,
    },
}

/// A backend event tagged with the load generation it was emitted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedEvent {
    pub generation: u64,
    pub event: BackendEvent,
}

pub type EventReceiver = mpsc::UnboundedReceiver<StampedEvent>;

/// Sending half of a backend's event stream. Clones share one generation counter.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<StampedEvent>,
    generation: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                generation: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn emit(&self, event: BackendEvent) {
        let generation = self.generation.load(Ordering::SeqCst);
        if self.tx.send(StampedEvent { generation, event }).is_err() {
            log::debug!("Backend event dropped, session receiver is gone");
        }
    }

    /// Start a new load; returns the token events will be stamped with from now on.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Host side of a media surface (audio element, embedded player).
///
/// Every event is stamped with the source load that was current when the host
/// raised it, so events from a source the backend has since replaced can be
/// told apart from events of the new one, however late they are drained.
pub struct SurfaceSender<E> {
    tx: mpsc::UnboundedSender<(u64, E)>,
    load: Arc<AtomicU64>,
}

impl<E> Clone for SurfaceSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            load: Arc::clone(&self.load),
        }
    }
}

impl<E> SurfaceSender<E> {
    /// Returns false once the backend side is gone.
    pub fn send(&self, event: E) -> bool {
        let load = self.load.load(Ordering::SeqCst);
        self.tx.send((load, event)).is_ok()
    }
}

/// Backend side of a media surface's event stream.
pub struct SurfaceEvents<E> {
    rx: mpsc::UnboundedReceiver<(u64, E)>,
    load: Arc<AtomicU64>,
}

impl<E> SurfaceEvents<E> {
    pub fn channel() -> (SurfaceSender<E>, SurfaceEvents<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let load = Arc::new(AtomicU64::new(0));
        (
            SurfaceSender {
                tx,
                load: Arc::clone(&load),
            },
            SurfaceEvents { rx, load },
        )
    }

    /// Counter the backend bumps whenever it swaps the surface's source.
    pub(crate) fn source_load(&self) -> SourceLoad {
        SourceLoad(Arc::clone(&self.load))
    }

    /// Next event, and whether it was raised under the current source.
    pub(crate) async fn recv(&mut self) -> Option<(E, bool)> {
        let (stamp, event) = self.rx.recv().await?;
        Some((event, stamp == self.load.load(Ordering::SeqCst)))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SourceLoad(Arc<AtomicU64>);

impl SourceLoad {
    pub(crate) fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// One playback technology behind a common, asynchronous control surface.
///
/// `connect` is called once when the session installs the backend, `dispose`
/// once when it is removed. Everything the backend learns asynchronously is
/// reported through the emitter handed to `connect`.
#[async_trait]
pub trait PlaybackBackend: Send {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    async fn connect(&mut self, events: EventEmitter) -> AppResult<()>;

    async fn prepare(&mut self, track: &Track) -> AppResult<()>;

    async fn play(&mut self) -> AppResult<()>;

    async fn pause(&mut self) -> AppResult<()>;

    /// No-op unless `capabilities().seek` says otherwise.
    async fn seek(&mut self, _position_ms: u64) -> AppResult<()> {
        Ok(())
    }

    /// Release everything the backend holds. Must tolerate repeated calls.
    async fn dispose(&mut self);
}
