//! Where queues come from: featured playlists, playlist items, search results.

use crate::api::client::WebApiClient;
use crate::api::models::{Playlist, Track, VideoTrack};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;

/// Supplies track lists to the session. Implementations drop null and
/// placeholder entries before handing a list over.
#[async_trait]
pub trait BrowsingGateway: Send + Sync {
    async fn featured_playlists(&self) -> AppResult<Vec<Playlist>>;

    async fn playlist_tracks(&self, playlist_id: &str) -> AppResult<Vec<Track>>;

    async fn search_tracks(&self, query: &str) -> AppResult<Vec<Track>>;
}

#[async_trait]
impl BrowsingGateway for WebApiClient {
    async fn featured_playlists(&self) -> AppResult<Vec<Playlist>> {
        self.get_featured_playlists().await
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> AppResult<Vec<Track>> {
        self.get_playlist_items(playlist_id).await
    }

    async fn search_tracks(&self, query: &str) -> AppResult<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        WebApiClient::search_tracks(self, query).await
    }
}

/// In-memory catalog, used for the video-surrogate track list.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    playlists: Vec<(Playlist, Vec<Track>)>,
    tracks: Vec<Track>,
}

impl StaticCatalog {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            playlists: Vec::new(),
            tracks,
        }
    }

    /// Build from the surrogate catalog's JSON track list.
    pub fn from_video_json(json: &str) -> AppResult<Self> {
        let videos: Vec<VideoTrack> = serde_json::from_str(json)?;
        Ok(Self::new(videos.into_iter().map(Track::from).collect()))
    }

    pub fn with_playlist(mut self, playlist: Playlist, tracks: Vec<Track>) -> Self {
        self.playlists.push((playlist, tracks));
        self
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }
}

#[async_trait]
impl BrowsingGateway for StaticCatalog {
    async fn featured_playlists(&self) -> AppResult<Vec<Playlist>> {
        Ok(self.playlists.iter().map(|(p, _)| p.clone()).collect())
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> AppResult<Vec<Track>> {
        self.playlists
            .iter()
            .find(|(p, _)| p.id == playlist_id)
            .map(|(_, tracks)| tracks.clone())
            .ok_or_else(|| AppError::NotFound(format!("playlist {}", playlist_id)))
    }

    async fn search_tracks(&self, query: &str) -> AppResult<Vec<Track>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .tracks
            .iter()
            .filter(|t| t.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}
