use crate::api::models::Track;
use crate::error::{AppError, AppResult};

/// Ordered tracks plus a cursor that is either unset or a valid index.
/// Replaced wholesale on every browsing selection.
#[derive(Debug, Default, Clone)]
pub struct QueueModel {
    tracks: Vec<Track>,
    current_index: Option<usize>,
}

impl QueueModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new sequence; the cursor is always unset afterwards.
    pub fn replace(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        self.current_index = None;
    }

    pub fn jump_to(&mut self, index: usize) -> AppResult<()> {
        if index >= self.tracks.len() {
            return Err(AppError::IndexOutOfRange {
                index,
                len: self.tracks.len(),
            });
        }
        self.current_index = Some(index);
        Ok(())
    }

    /// Move forward one slot, wrapping; `None` on an empty queue.
    pub fn advance(&mut self) -> Option<usize> {
        let next = self.following()?;
        self.current_index = Some(next);
        Some(next)
    }

    /// Move back one slot, wrapping; `None` on an empty queue.
    pub fn retreat(&mut self) -> Option<usize> {
        let prev = self.preceding()?;
        self.current_index = Some(prev);
        Some(prev)
    }

    /// Where `advance` would land, without moving.
    pub fn following(&self) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        Some(self.current_index.map(|i| (i + 1) % len).unwrap_or(0))
    }

    /// Where `retreat` would land, without moving.
    pub fn preceding(&self) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        Some(self.current_index.map(|i| (i + len - 1) % len).unwrap_or(len - 1))
    }

    /// The slot after `index`, wrapping.
    pub fn after(&self, index: usize) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            None
        } else {
            Some((index + 1) % len)
        }
    }

    pub fn cursor(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.tracks.get(i))
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// True when `tracks` is the same sequence (by id) as the loaded one.
    pub fn same_tracks(&self, tracks: &[Track]) -> bool {
        self.tracks.len() == tracks.len()
            && self.tracks.iter().zip(tracks).all(|(a, b)| a.id == b.id)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
