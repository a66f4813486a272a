use crate::api::models::Track;
use crate::token_store::AuthState;
use serde::Serialize;

pub const PLAYBACK_PROGRESS: &str = "playback:progress";
pub const PLAYBACK_TRACK_CHANGED: &str = "playback:track-changed";
pub const PLAYBACK_STATE_CHANGED: &str = "playback:state-changed";
pub const PLAYBACK_TRACK_ENDED: &str = "playback:track-ended";
pub const PLAYBACK_QUEUE_CHANGED: &str = "playback:queue-changed";
pub const AUTH_STATE_CHANGED: &str = "auth:state-changed";
pub const SESSION_NOTICE: &str = "session:notice";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub position_ms: u64,
    pub duration_ms: u64,
    pub position_fraction: f64,
}

impl ProgressPayload {
    pub fn new(position_ms: u64, duration_ms: u64) -> Self {
        let position_fraction = if duration_ms > 0 {
            position_ms as f64 / duration_ms as f64
        } else {
            0.0
        };
        Self {
            position_ms,
            duration_ms,
            position_fraction,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackChangedPayload {
    pub index: usize,
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: u64,
    pub artwork_url: Option<String>,
}

impl TrackChangedPayload {
    pub fn from_track(index: usize, track: &Track) -> Self {
        Self {
            index,
            track_id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist_names(),
            album: track.album.name.clone(),
            duration_ms: track.duration_ms,
            artwork_url: track.artwork_url().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Discrete happenings of a session, broadcast to every subscriber.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum SessionEvent {
    Progress(ProgressPayload),
    TrackChanged(TrackChangedPayload),
    StateChanged { state: TransportState },
    TrackEnded { track_id: Option<String> },
    QueueChanged { length: usize, cursor: Option<usize> },
    AuthStateChanged { authenticated: bool },
    /// Something the user should be told about, usually a rejected intent.
    Notice {
        level: NoticeLevel,
        kind: String,
        message: String,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Progress(_) => PLAYBACK_PROGRESS,
            SessionEvent::TrackChanged(_) => PLAYBACK_TRACK_CHANGED,
            SessionEvent::StateChanged { .. } => PLAYBACK_STATE_CHANGED,
            SessionEvent::TrackEnded { .. } => PLAYBACK_TRACK_ENDED,
            SessionEvent::QueueChanged { .. } => PLAYBACK_QUEUE_CHANGED,
            SessionEvent::AuthStateChanged { .. } => AUTH_STATE_CHANGED,
            SessionEvent::Notice { .. } => SESSION_NOTICE,
        }
    }

    pub fn auth(state: AuthState) -> Self {
        SessionEvent::AuthStateChanged {
            authenticated: state == AuthState::Authenticated,
        }
    }

    pub fn warning(kind: &str, message: impl Into<String>) -> Self {
        SessionEvent::Notice {
            level: NoticeLevel::Warning,
            kind: kind.to_string(),
            message: message.into(),
        }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        SessionEvent::Notice {
            level: NoticeLevel::Error,
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_fraction_handles_unknown_duration() {
        assert_eq!(ProgressPayload::new(5_000, 0).position_fraction, 0.0);
        assert_eq!(ProgressPayload::new(5_000, 20_000).position_fraction, 0.25);
    }

    #[test]
    fn serializes_with_event_tag() {
        let event = SessionEvent::StateChanged {
            state: TransportState::Paused,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "stateChanged");
        assert_eq!(json["payload"]["state"], "paused");
        assert_eq!(event.name(), PLAYBACK_STATE_CHANGED);
    }
}
