use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Playback backend is not ready")]
    NotReady,

    #[error("Track is not playable on this backend: {0}")]
    Unplayable(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Index {index} out of range for queue of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Web API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Session is no longer running")]
    SessionClosed,
}

/// Failures of the credential lifecycle. Every one of them ends the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no code verifier on record")]
    MissingVerifier,

    #[error("authorization state does not match the pending request")]
    StateMismatch,

    #[error("authorization callback carried no code")]
    MissingCode,

    #[error("authorization denied: {0}")]
    Denied(String),

    #[error("token exchange rejected ({status}): {message}")]
    ExchangeRejected { status: u16, message: String },

    #[error("token refresh rejected ({status}): {message}")]
    RefreshRejected { status: u16, message: String },

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("credential rejected by the server")]
    Unauthorized,
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AppError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Http(_) => "http",
            AppError::Json(_) => "json",
            AppError::Io(_) => "io",
            AppError::Auth(_) => "auth",
            AppError::NotReady => "not_ready",
            AppError::Unplayable(_) => "unplayable",
            AppError::Load(_) => "load",
            AppError::IndexOutOfRange { .. } => "index_out_of_range",
            AppError::Api { .. } => "api",
            AppError::NotFound(_) => "not_found",
            AppError::Config(_) => "config",
            AppError::Storage(_) => "storage",
            AppError::SessionClosed => "session_closed",
        }
    }

    /// Authentication failures tear the whole session down.
    pub fn is_auth(&self) -> bool {
        matches!(self, AppError::Auth(_))
    }

    /// Errors after which retrying the same intent may succeed; queue state is
    /// left untouched when one of these is returned.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::NotReady
                | AppError::Unplayable(_)
                | AppError::Load(_)
                | AppError::Http(_)
                | AppError::Api { .. }
                | AppError::NotFound(_)
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
