use crate::error::{AppError, AppResult};
use crate::playback::backend::BackendKind;
use crate::token_store::RefreshPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";
const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

/// What auto-advance does once the queue has been played through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndOfQueue {
    /// Stop before replaying the track the run started from.
    Stop,
    /// Keep cycling through the queue.
    Wrap,
}

impl Default for EndOfQueue {
    fn default() -> Self {
        EndOfQueue::Stop
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
    #[serde(default)]
    pub end_of_queue: EndOfQueue,
    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_authorize_url() -> String {
    DEFAULT_AUTHORIZE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_scopes() -> Vec<String> {
    [
        "streaming",
        "user-read-email",
        "user-read-private",
        "user-read-playback-state",
        "user-modify-playback-state",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_backend() -> BackendKind {
    BackendKind::Device
}

fn default_progress_tick_ms() -> u64 {
    1000
}

fn default_device_name() -> String {
    "Mixtape Player".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: default_redirect_uri(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            scopes: default_scopes(),
            backend: default_backend(),
            refresh_policy: RefreshPolicy::default(),
            end_of_queue: EndOfQueue::default(),
            progress_tick_ms: default_progress_tick_ms(),
            device_name: default_device_name(),
        }
    }
}

/// Everything the authorization-code exchange needs to talk to the provider.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub refresh_policy: RefreshPolicy,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub end_of_queue: EndOfQueue,
    pub progress_tick: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            end_of_queue: EndOfQueue::default(),
            progress_tick: Duration::from_millis(default_progress_tick_ms()),
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> AppResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| AppError::Config("Cannot find home directory".into()))?;
        Ok(home.join(".mixtape"))
    }

    pub fn config_path() -> AppResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn credentials_path() -> AppResult<PathBuf> {
        Ok(Self::config_dir()?.join("credentials.json"))
    }

    pub fn load() -> AppResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::Config(format!(
                "Config file not found at {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Loads the config, writing defaults on first run so the file exists for next launch.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config: {}. Using defaults.", e);
            let default_config = AppConfig::default();
            if let Err(save_err) = default_config.save() {
                log::error!("Failed to save default config: {}", save_err);
            }
            default_config
        })
    }

    pub fn save(&self) -> AppResult<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(AppError::Config("client_id is not set".into()));
        }
        if self.progress_tick_ms == 0 {
            return Err(AppError::Config("progress_tick_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            authorize_url: self.authorize_url.clone(),
            token_url: self.token_url.clone(),
            scopes: self.scopes.clone(),
            refresh_policy: self.refresh_policy,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            end_of_queue: self.end_of_queue,
            progress_tick: Duration::from_millis(self.progress_tick_ms.max(1)),
        }
    }
}
