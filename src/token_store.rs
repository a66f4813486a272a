//! Credential lifecycle: PKCE exchange, persistence, expiry and invalidation.

use crate::api::auth::{self, PkceChallenge};
use crate::api::models::TokenResponse;
use crate::clock::Clock;
use crate::config::AuthSettings;
use crate::error::{AppError, AppResult, AuthError};
use crate::storage::{
    KeyValueStore, ACCESS_TOKEN_KEY, AUTH_STATE_KEY, CODE_VERIFIER_KEY, CREDENTIAL_KEYS,
    EXPIRES_AT_KEY, REFRESH_TOKEN_KEY,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Whether an expired credential may be renewed without user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    Never,
    Silent,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        RefreshPolicy::Never
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Authenticated,
    SignedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn from_response(token: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            access_token: token.access_token,
            expires_at: now + chrono::Duration::seconds(token.expires_in as i64),
            refresh_token: token.refresh_token,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub struct TokenStore {
    http: reqwest::Client,
    settings: AuthSettings,
    storage: RwLock<Box<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
    auth_state: watch::Sender<AuthState>,
}

impl TokenStore {
    pub fn new(
        http: reqwest::Client,
        settings: AuthSettings,
        storage: Box<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let initial = match read_credential(storage.as_ref()) {
            Ok(Some(credential)) if credential.is_valid_at(clock.now()) => AuthState::Authenticated,
            _ => AuthState::SignedOut,
        };
        let (auth_state, _) = watch::channel(initial);
        Self {
            http,
            settings,
            storage: RwLock::new(storage),
            clock,
            auth_state,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    pub fn auth_state(&self) -> AuthState {
        *self.auth_state.borrow()
    }

    /// Start a PKCE login: persists a fresh verifier and state, returns the authorize URL.
    pub async fn begin_authorization(&self) -> AppResult<String> {
        let pkce = PkceChallenge::generate();
        let state = uuid::Uuid::new_v4().to_string();

        let mut storage = self.storage.write().await;
        storage.set(CODE_VERIFIER_KEY, &pkce.verifier)?;
        storage.set(AUTH_STATE_KEY, &state)?;
        drop(storage);

        auth::build_auth_url(&self.settings, &pkce.challenge, &state)
    }

    /// Finish a login from the provider's redirect URL.
    pub async fn complete_authorization(&self, callback_url: &str) -> AppResult<Credential> {
        let callback = match auth::parse_callback(callback_url) {
            Ok(callback) => callback,
            Err(e) => {
                self.invalidate().await;
                return Err(e);
            }
        };

        let expected = self.storage.read().await.get(AUTH_STATE_KEY)?;
        if let Some(expected) = expected {
            if callback.state.as_deref() != Some(expected.as_str()) {
                log::warn!("Authorization callback state mismatch");
                self.invalidate().await;
                return Err(AuthError::StateMismatch.into());
            }
        }

        self.exchange(&callback.code).await
    }

    /// Exchange an authorization code for a credential using the stored verifier.
    pub async fn exchange(&self, code: &str) -> AppResult<Credential> {
        let verifier = {
            let mut storage = self.storage.write().await;
            let verifier = storage.get(CODE_VERIFIER_KEY)?;
            // Consumed exactly once, whatever the outcome.
            storage.remove(CODE_VERIFIER_KEY)?;
            storage.remove(AUTH_STATE_KEY)?;
            verifier
        };

        let Some(verifier) = verifier else {
            log::warn!("Token exchange attempted without a code verifier");
            self.invalidate().await;
            return Err(AuthError::MissingVerifier.into());
        };

        let token = match auth::exchange_code(&self.http, &self.settings, code, &verifier).await {
            Ok(token) => token,
            Err(e) => {
                log::error!("Token exchange failed: {}", e);
                self.invalidate().await;
                return Err(e);
            }
        };

        let credential = Credential::from_response(token, self.clock.now());
        self.persist(&credential).await?;
        log::info!("Credential stored, expires at {}", credential.expires_at);
        Ok(credential)
    }

    /// The stored credential, only while it is unexpired.
    pub async fn current(&self) -> Option<Credential> {
        let storage = self.storage.read().await;
        match read_credential(storage.as_ref()) {
            Ok(Some(credential)) if credential.is_valid_at(self.clock.now()) => Some(credential),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to read stored credential: {}", e);
                None
            }
        }
    }

    /// Entry point for every authenticated call. Falls back to a silent refresh
    /// when the policy allows it; otherwise invalidates and fails.
    pub async fn require(&self) -> AppResult<Credential> {
        if let Some(credential) = self.current().await {
            return Ok(credential);
        }

        if self.settings.refresh_policy == RefreshPolicy::Silent && self.has_refresh_token().await {
            return self.refresh().await;
        }

        log::warn!("No valid credential, signing out");
        self.invalidate().await;
        Err(AuthError::NotAuthenticated.into())
    }

    /// Renew the credential with the stored refresh token. Any refusal signs out.
    pub async fn refresh(&self) -> AppResult<Credential> {
        let refresh_token = self.storage.read().await.get(REFRESH_TOKEN_KEY)?;
        let Some(refresh_token) = refresh_token else {
            self.invalidate().await;
            return Err(AuthError::NotAuthenticated.into());
        };

        match auth::refresh_user_token(&self.http, &self.settings, &refresh_token).await {
            Ok(token) => {
                let mut credential = Credential::from_response(token, self.clock.now());
                // Providers may omit the refresh token when it is unchanged.
                if credential.refresh_token.is_none() {
                    credential.refresh_token = Some(refresh_token);
                }
                self.persist(&credential).await?;
                log::info!("Credential refreshed, expires at {}", credential.expires_at);
                Ok(credential)
            }
            Err(e) => {
                log::warn!("Token refresh failed: {}. User will need to re-login.", e);
                self.invalidate().await;
                Err(e)
            }
        }
    }

    /// Clear every piece of credential material and announce the sign-out.
    pub async fn invalidate(&self) {
        let mut storage = self.storage.write().await;
        for key in CREDENTIAL_KEYS {
            if let Err(e) = storage.remove(key) {
                log::error!("Failed to clear {}: {}", key, e);
            }
        }
        drop(storage);

        self.auth_state.send_if_modified(|state| {
            let changed = *state != AuthState::SignedOut;
            *state = AuthState::SignedOut;
            changed
        });
        log::info!("Credential invalidated");
    }

    async fn has_refresh_token(&self) -> bool {
        matches!(self.storage.read().await.get(REFRESH_TOKEN_KEY), Ok(Some(_)))
    }

    async fn persist(&self, credential: &Credential) -> AppResult<()> {
        let mut storage = self.storage.write().await;
        storage.set(ACCESS_TOKEN_KEY, &credential.access_token)?;
        storage.set(EXPIRES_AT_KEY, &credential.expires_at.to_rfc3339())?;
        match &credential.refresh_token {
            Some(rt) => storage.set(REFRESH_TOKEN_KEY, rt)?,
            None => storage.remove(REFRESH_TOKEN_KEY)?,
        }
        drop(storage);

        self.auth_state.send_replace(AuthState::Authenticated);
        Ok(())
    }
}

fn read_credential(storage: &dyn KeyValueStore) -> AppResult<Option<Credential>> {
    let Some(access_token) = storage.get(ACCESS_TOKEN_KEY)? else {
        return Ok(None);
    };
    let Some(expires_at) = storage.get(EXPIRES_AT_KEY)? else {
        return Ok(None);
    };
    let expires_at = DateTime::parse_from_rfc3339(&expires_at)
        .map_err(|e| AppError::Storage(format!("bad expiry timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(Some(Credential {
        access_token,
        expires_at,
        refresh_token: storage.get(REFRESH_TOKEN_KEY)?,
    }))
}
