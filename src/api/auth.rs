use crate::api::models::TokenResponse;
use crate::config::AuthSettings;
use crate::error::{AppError, AppResult, AuthError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

const VERIFIER_LEN: usize = 64;

pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(VERIFIER_LEN)
            .map(char::from)
            .collect();
        let challenge = challenge_for(&verifier);

        Self {
            verifier,
            challenge,
        }
    }
}

/// S256 code challenge: base64url(sha256(verifier)) without padding.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

pub fn build_auth_url(settings: &AuthSettings, code_challenge: &str, state: &str) -> AppResult<String> {
    let scopes = settings.scopes.join(" ");
    let url = url::Url::parse_with_params(
        &settings.authorize_url,
        &[
            ("response_type", "code"),
            ("client_id", settings.client_id.as_str()),
            ("redirect_uri", settings.redirect_uri.as_str()),
            ("scope", scopes.as_str()),
            ("code_challenge_method", "S256"),
            ("code_challenge", code_challenge),
            ("state", state),
        ],
    )
    .map_err(|e| AppError::Config(format!("Invalid authorize URL: {}", e)))?;
    log::info!("Auth URL: {}", url);
    Ok(url.into())
}

pub async fn exchange_code(
    http: &reqwest::Client,
    settings: &AuthSettings,
    code: &str,
    code_verifier: &str,
) -> AppResult<TokenResponse> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", settings.redirect_uri.as_str()),
        ("client_id", settings.client_id.as_str()),
        ("code_verifier", code_verifier),
    ];

    let response = http.post(&settings.token_url).form(&params).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::ExchangeRejected {
            status: status.as_u16(),
            message: body,
        }
        .into());
    }

    let token: TokenResponse = response.json().await?;
    Ok(token)
}

/// Trade a refresh token for a fresh access token.
pub async fn refresh_user_token(
    http: &reqwest::Client,
    settings: &AuthSettings,
    refresh_token: &str,
) -> AppResult<TokenResponse> {
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", settings.client_id.as_str()),
    ];

    let response = http.post(&settings.token_url).form(&params).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::RefreshRejected {
            status: status.as_u16(),
            message: body,
        }
        .into());
    }

    let token: TokenResponse = response.json().await?;
    Ok(token)
}

/// What the provider handed back on the redirect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCallback {
    pub code: String,
    pub state: Option<String>,
}

/// Pull `code` and `state` out of the redirect URL, surfacing a provider `error`.
pub fn parse_callback(callback_url: &str) -> AppResult<AuthCallback> {
    let url = url::Url::parse(callback_url)
        .map_err(|e| AppError::Config(format!("Invalid callback URL: {}", e)))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(AuthError::Denied(value.into_owned()).into()),
            _ => {}
        }
    }

    let code = code.filter(|c| !c.is_empty()).ok_or(AuthError::MissingCode)?;
    Ok(AuthCallback { code, state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::RefreshPolicy;

    fn settings() -> AuthSettings {
        AuthSettings {
            client_id: "client-123".into(),
            redirect_uri: "http://127.0.0.1:8888/callback".into(),
            authorize_url: "https://accounts.example.com/authorize".into(),
            token_url: "https://accounts.example.com/api/token".into(),
            scopes: vec!["streaming".into(), "user-read-email".into()],
            refresh_policy: RefreshPolicy::Never,
        }
    }

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let pkce = PkceChallenge::generate();
        assert_eq!(pkce.verifier.len(), VERIFIER_LEN);
        assert!(pkce.verifier.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(pkce.challenge, challenge_for(&pkce.verifier));
        // 32 byte digest, unpadded base64url
        assert_eq!(pkce.challenge.len(), 43);
        assert!(!pkce.challenge.contains('='));
    }

    #[test]
    fn known_challenge_vector() {
        // RFC 7636 appendix B
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn auth_url_carries_pkce_parameters() {
        let url = build_auth_url(&settings(), "challenge-abc", "state-1").unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["code_challenge"], "challenge-abc");
        assert_eq!(pairs["state"], "state-1");
        assert_eq!(pairs["scope"], "streaming user-read-email");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:8888/callback");
    }

    #[test]
    fn callback_parsing() {
        let cb = parse_callback("http://127.0.0.1:8888/callback?code=abc&state=xyz").unwrap();
        assert_eq!(cb.code, "abc");
        assert_eq!(cb.state.as_deref(), Some("xyz"));

        let denied = parse_callback("http://127.0.0.1:8888/callback?error=access_denied").unwrap_err();
        assert!(matches!(denied, AppError::Auth(AuthError::Denied(ref e)) if e == "access_denied"));

        let missing = parse_callback("http://127.0.0.1:8888/callback?state=xyz").unwrap_err();
        assert!(matches!(missing, AppError::Auth(AuthError::MissingCode)));
    }
}
