//! Runs a `SessionController` on its own task.
//!
//! User intents, backend events, credential changes and the position tick all
//! arrive through one `select!` loop, so no two transitions ever interleave.

use crate::api::models::Track;
use crate::error::{AppError, AppResult};
use crate::events::SessionEvent;
use crate::playback::backend::{EventReceiver, PlaybackBackend, StampedEvent};
use crate::session::controller::SessionController;
use crate::session::state::{PlayContext, SessionSnapshot};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

const COMMAND_CAPACITY: usize = 32;

type Reply<T> = oneshot::Sender<AppResult<T>>;

pub enum SessionCommand {
    InstallBackend {
        backend: Box<dyn PlaybackBackend>,
        reply: Reply<()>,
    },
    SelectQueue {
        tracks: Vec<Track>,
        start_index: Option<usize>,
        reply: Reply<()>,
    },
    Play {
        track: Track,
        index: usize,
        context: Option<PlayContext>,
        reply: Reply<()>,
    },
    PlayAt {
        index: usize,
        reply: Reply<()>,
    },
    TogglePause {
        reply: Reply<()>,
    },
    Next {
        reply: Reply<()>,
    },
    Previous {
        reply: Reply<()>,
    },
    Seek {
        position_ms: u64,
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    async fn request(
        &self,
        build: impl FnOnce(Reply<()>) -> SessionCommand,
    ) -> AppResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| AppError::SessionClosed)?;
        rx.await.map_err(|_| AppError::SessionClosed)?
    }

    pub async fn install_backend(&self, backend: Box<dyn PlaybackBackend>) -> AppResult<()> {
        self.request(|reply| SessionCommand::InstallBackend { backend, reply })
            .await
    }

    pub async fn select_queue(&self, tracks: Vec<Track>, start_index: Option<usize>) -> AppResult<()> {
        self.request(|reply| SessionCommand::SelectQueue {
            tracks,
            start_index,
            reply,
        })
        .await
    }

    pub async fn play(
        &self,
        track: Track,
        index: usize,
        context: Option<PlayContext>,
    ) -> AppResult<()> {
        self.request(|reply| SessionCommand::Play {
            track,
            index,
            context,
            reply,
        })
        .await
    }

    pub async fn play_at(&self, index: usize) -> AppResult<()> {
        self.request(|reply| SessionCommand::PlayAt { index, reply })
            .await
    }

    pub async fn toggle_pause(&self) -> AppResult<()> {
        self.request(|reply| SessionCommand::TogglePause { reply })
            .await
    }

    pub async fn next(&self) -> AppResult<()> {
        self.request(|reply| SessionCommand::Next { reply }).await
    }

    pub async fn previous(&self) -> AppResult<()> {
        self.request(|reply| SessionCommand::Previous { reply })
            .await
    }

    pub async fn seek(&self, position_ms: u64) -> AppResult<()> {
        self.request(|reply| SessionCommand::Seek { position_ms, reply })
            .await
    }

    /// Dispose the backend and stop the session task.
    pub async fn shutdown(&self) -> AppResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Shutdown { reply })
            .await
            .map_err(|_| AppError::SessionClosed)?;
        rx.await.map_err(|_| AppError::SessionClosed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

pub fn spawn_session(controller: SessionController) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let handle = SessionHandle {
        commands: tx,
        snapshot: controller.subscribe(),
        events: controller.event_sender(),
    };
    let task = tokio::spawn(run(controller, rx));
    (handle, task)
}

async fn run(mut controller: SessionController, mut commands: mpsc::Receiver<SessionCommand>) {
    let mut backend_events: Option<EventReceiver> = None;
    let mut auth = controller.tokens().subscribe();
    let every = controller.settings().progress_tick;
    let mut ticker: Option<Interval> = None;

    loop {
        if controller.needs_tick() {
            if ticker.is_none() {
                let mut interval = time::interval_at(Instant::now() + every, every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker = Some(interval);
            }
        } else if ticker.take().is_some() {
            log::debug!("Position tick stopped");
        }

        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if !dispatch(&mut controller, command, &mut backend_events).await {
                    return;
                }
            }
            event = next_event(&mut backend_events) => controller.handle_event(event).await,
            changed = auth.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *auth.borrow_and_update();
                controller.on_auth_changed(state).await;
            }
            _ = next_tick(&mut ticker) => controller.on_tick(),
        }
    }

    controller.shutdown().await;
}

/// Returns false once the session should stop.
async fn dispatch(
    controller: &mut SessionController,
    command: SessionCommand,
    backend_events: &mut Option<EventReceiver>,
) -> bool {
    match command {
        SessionCommand::InstallBackend { backend, reply } => {
            let result = controller.install_backend(backend).await.map(|rx| {
                *backend_events = Some(rx);
            });
            let _ = reply.send(result);
        }
        SessionCommand::SelectQueue {
            tracks,
            start_index,
            reply,
        } => {
            let _ = reply.send(controller.select_queue(tracks, start_index).await);
        }
        SessionCommand::Play {
            track,
            index,
            context,
            reply,
        } => {
            let _ = reply.send(controller.play(&track, index, context).await);
        }
        SessionCommand::PlayAt { index, reply } => {
            let _ = reply.send(controller.play_at(index).await);
        }
        SessionCommand::TogglePause { reply } => {
            let _ = reply.send(controller.toggle_pause().await);
        }
        SessionCommand::Next { reply } => {
            let _ = reply.send(controller.next().await);
        }
        SessionCommand::Previous { reply } => {
            let _ = reply.send(controller.previous().await);
        }
        SessionCommand::Seek { position_ms, reply } => {
            let _ = reply.send(controller.seek(position_ms).await);
        }
        SessionCommand::Shutdown { reply } => {
            controller.shutdown().await;
            *backend_events = None;
            let _ = reply.send(());
            return false;
        }
    }
    true
}

async fn next_event(backend_events: &mut Option<EventReceiver>) -> StampedEvent {
    if let Some(rx) = backend_events.as_mut() {
        if let Some(event) = rx.recv().await {
            return event;
        }
    }
    *backend_events = None;
    std::future::pending().await
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
