//! Collaborator traits for the profile store and the music catalog

use anyhow::Result;
use async_trait::async_trait;

use cadenza_store::{Album, MusicStoreDb, Profile, ProfileField, ScoredTrack, Track};

/// Customer profile storage
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when the id does not resolve
    async fn get(&self, user_id: i64) -> Result<Option<Profile>>;

    /// Apply field changes, returning rows affected (0 means the user is gone)
    async fn update(&self, user_id: i64, changes: &[(ProfileField, String)]) -> Result<usize>;
}

/// Read-only music catalog
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn search_by_artist(&self, artist: &str) -> Result<Vec<Track>>;
    async fn albums_by_artist(&self, artist: &str) -> Result<Vec<Album>>;
    async fn search_by_title(&self, title: &str, limit: usize) -> Result<Vec<Track>>;
    async fn find_track(&self, title: &str) -> Result<Option<Track>>;
    async fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredTrack>>;
}

#[async_trait]
impl ProfileStore for MusicStoreDb {
    async fn get(&self, user_id: i64) -> Result<Option<Profile>> {
        self.get_customer(user_id).await
    }

    async fn update(&self, user_id: i64, changes: &[(ProfileField, String)]) -> Result<usize> {
        self.update_customer(user_id, changes.to_vec()).await
    }
}

#[async_trait]
impl CatalogStore for MusicStoreDb {
    async fn search_by_artist(&self, artist: &str) -> Result<Vec<Track>> {
        self.tracks_by_artist(artist).await
    }

    async fn albums_by_artist(&self, artist: &str) -> Result<Vec<Album>> {
        MusicStoreDb::albums_by_artist(self, artist).await
    }

    async fn search_by_title(&self, title: &str, limit: usize) -> Result<Vec<Track>> {
        self.search_tracks(title, limit).await
    }

    async fn find_track(&self, title: &str) -> Result<Option<Track>> {
        MusicStoreDb::find_track(self, title).await
    }

    async fn similarity_search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredTrack>> {
        self.similar_tracks(query, k).await
    }
}
