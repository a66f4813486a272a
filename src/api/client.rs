use crate::api::models::{
    FeaturedPlaylistsResponse, PagingObject, Playlist, PlaylistItem, SearchResults, Track,
    UserProfile,
};
use crate::error::{AppError, AppResult, AuthError};
use crate::token_store::{RefreshPolicy, TokenStore};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde_json::json;
use std::sync::Arc;

const USER_AGENT: &str = "Mixtape/0.1.0";

/// Bearer-authenticated Web API access. Every request asks the token store for
/// a credential immediately before it is sent.
pub struct WebApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl WebApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenStore>) -> AppResult<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_http(http, base_url, tokens))
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<TokenStore>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn auth_headers(&self) -> AppResult<HeaderMap> {
        let credential = self.tokens.require().await?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let auth_value = format!("Bearer {}", credential.access_token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| AppError::Config(e.to_string()))?,
        );
        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> AppResult<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let build = |headers: HeaderMap| {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .headers(headers)
                .query(query);
            request = match body {
                Some(body) => request.json(body),
                // The player endpoints reject bodiless PUTs without a length.
                None if method == Method::PUT => request.header("Content-Length", "0"),
                None => request,
            };
            request
        };

        let response = build(self.auth_headers().await?).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && self.tokens.settings().refresh_policy == RefreshPolicy::Silent
        {
            log::info!("{} {} returned 401, refreshing credential", method, path);
            self.tokens.refresh().await?;
            let response = build(self.auth_headers().await?).send().await?;
            self.check_response(response).await
        } else {
            self.check_response(response).await
        }
    }

    async fn check_response(&self, response: reqwest::Response) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::UNAUTHORIZED {
            log::warn!("Credential rejected by {}", response.url().path());
            self.tokens.invalidate().await;
            Err(AuthError::Unauthorized.into())
        } else if status == StatusCode::NOT_FOUND {
            let message = response.text().await.unwrap_or_default();
            Err(AppError::NotFound(message))
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            Err(AppError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    pub async fn get(&self, path: &str) -> AppResult<reqwest::Response> {
        self.send(Method::GET, path, &[], None).await
    }

    pub async fn get_with_query(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<reqwest::Response> {
        self.send(Method::GET, path, query, None).await
    }

    pub async fn put(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> AppResult<reqwest::Response> {
        self.send(Method::PUT, path, query, body).await
    }

    pub async fn get_user_profile(&self) -> AppResult<UserProfile> {
        Ok(self.get("me").await?.json().await?)
    }

    pub async fn get_featured_playlists(&self) -> AppResult<Vec<Playlist>> {
        let response: FeaturedPlaylistsResponse = self
            .get_with_query("browse/featured-playlists", &[("limit", "50".into())])
            .await?
            .json()
            .await?;
        Ok(response.playlists.items.into_iter().flatten().collect())
    }

    pub async fn get_playlist_items(&self, playlist_id: &str) -> AppResult<Vec<Track>> {
        let path = format!("playlists/{}/tracks", urlencoding::encode(playlist_id));
        let page: PagingObject<PlaylistItem> = self.get(&path).await?.json().await?;
        Ok(page.items.into_iter().filter_map(|item| item.track).collect())
    }

    pub async fn search_tracks(&self, query: &str) -> AppResult<Vec<Track>> {
        let results: SearchResults = self
            .get_with_query(
                "search",
                &[
                    ("q", query.to_string()),
                    ("type", "track".into()),
                    ("limit", "20".into()),
                ],
            )
            .await?
            .json()
            .await?;
        Ok(results.tracks.items.into_iter().flatten().collect())
    }

    /// Start playback of `uris` on a device.
    pub async fn start_playback(&self, device_id: &str, uris: &[String]) -> AppResult<()> {
        let body = json!({ "uris": uris });
        self.put("me/player/play", &[("device_id", device_id.into())], Some(&body))
            .await?;
        Ok(())
    }

    pub async fn resume_playback(&self, device_id: &str) -> AppResult<()> {
        self.put("me/player/play", &[("device_id", device_id.into())], None)
            .await?;
        Ok(())
    }

    pub async fn pause_playback(&self, device_id: &str) -> AppResult<()> {
        self.put("me/player/pause", &[("device_id", device_id.into())], None)
            .await?;
        Ok(())
    }

    pub async fn seek_playback(&self, device_id: &str, position_ms: u64) -> AppResult<()> {
        self.put(
            "me/player/seek",
            &[
                ("position_ms", position_ms.to_string()),
                ("device_id", device_id.into()),
            ],
            None,
        )
        .await?;
        Ok(())
    }
}
