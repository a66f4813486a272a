pub mod api;
pub mod browse;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod session;
pub mod storage;
pub mod token_store;

pub use api::client::WebApiClient;
pub use api::models::Track;
pub use browse::{BrowsingGateway, StaticCatalog};
pub use config::AppConfig;
pub use error::{AppError, AppResult, AuthError};
pub use events::SessionEvent;
pub use playback::backend::{BackendKind, PlaybackBackend};
pub use session::{spawn_session, PlayContext, SessionController, SessionHandle, SessionSnapshot};
pub use token_store::{AuthState, Credential, RefreshPolicy, TokenStore};

use clock::SystemClock;
use playback::device::{DeviceBackend, DeviceLink, DeviceLinkHandle};
use std::sync::Arc;
use storage::FileStore;
use tokio::task::JoinHandle;

const USER_AGENT: &str = "Mixtape/0.1.0";

/// Install the global logger. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("mixtape=info"),
    )
    .try_init();
}

/// Token store backed by the credential file next to the config.
pub fn open_token_store(config: &AppConfig) -> AppResult<Arc<TokenStore>> {
    config.validate()?;
    let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
    let storage = FileStore::open(AppConfig::credentials_path()?)?;
    Ok(Arc::new(TokenStore::new(
        http,
        config.auth_settings(),
        Box::new(storage),
        Arc::new(SystemClock),
    )))
}

pub fn web_api(config: &AppConfig, tokens: Arc<TokenStore>) -> AppResult<Arc<WebApiClient>> {
    Ok(Arc::new(WebApiClient::new(
        config.api_base_url.clone(),
        tokens,
    )?))
}

/// Device backend plus the handle the SDK bridge drives, registered under the
/// configured device name.
pub fn device_backend(
    config: &AppConfig,
    api: Arc<WebApiClient>,
) -> (DeviceBackend, DeviceLinkHandle) {
    let (link, handle) = DeviceLink::channel(config.device_name.clone());
    (DeviceBackend::new(api, link), handle)
}

/// Spawn a session and connect `backend` to it.
pub async fn start_session(
    config: &AppConfig,
    tokens: Arc<TokenStore>,
    backend: Box<dyn PlaybackBackend>,
) -> AppResult<(SessionHandle, JoinHandle<()>)> {
    if backend.kind() != config.backend {
        log::warn!(
            "Configured backend is {:?} but a {:?} backend was supplied",
            config.backend,
            backend.kind()
        );
    }
    let controller = SessionController::new(tokens, config.session_settings());
    let (handle, task) = spawn_session(controller);
    if let Err(e) = handle.install_backend(backend).await {
        let _ = handle.shutdown().await;
        return Err(e);
    }
    log::info!("Session started");
    Ok((handle, task))
}
