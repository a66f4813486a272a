use crate::api::models::Track;
use crate::playback::backend::BackendKind;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No backend, no queue, or the queue ran out.
    Idle,
    BackendConnecting,
    ReadyPaused,
    ReadyPlaying,
    /// Left only by installing a fresh backend.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    #[default]
    NotReady,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Paused,
    Playing,
}

/// What the session believes the backend is doing. Only backend events move
/// `transport`; position is interpolated for backends that do not push it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub readiness: Readiness,
    pub transport: Transport,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub current_track: Option<Track>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub playback: PlaybackState,
    pub cursor: Option<usize>,
    pub queue_len: usize,
    pub backend: Option<BackendKind>,
    pub fault: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            playback: PlaybackState::default(),
            cursor: None,
            queue_len: 0,
            backend: None,
            fault: None,
        }
    }
}

/// Where a play intent came from. Carries the list the user was looking at so
/// the queue can follow the selection.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayContext {
    Playlist { id: String, tracks: Vec<Track> },
    Search { tracks: Vec<Track> },
}

impl PlayContext {
    pub fn tracks(&self) -> &[Track] {
        match self {
            PlayContext::Playlist { tracks, .. } | PlayContext::Search { tracks } => tracks,
        }
    }

    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            PlayContext::Playlist { tracks, .. } | PlayContext::Search { tracks } => tracks,
        }
    }
}
