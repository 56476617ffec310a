//! Music catalog tools

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use super::{ToolContext, ToolHandler, json_schema, names, required_str};
use crate::error::ToolError;
use crate::stores::CatalogStore;

const DEFAULT_SONG_LIMIT: usize = 10;
const DEFAULT_SIMILAR_K: usize = 5;
const MAX_SIMILAR_K: usize = 25;

/// Search songs by approximate title
pub struct CheckForSongsTool {
    catalog: Arc<dyn CatalogStore>,
}

impl CheckForSongsTool {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ToolHandler for CheckForSongsTool {
    fn name(&self) -> &str {
        names::CHECK_FOR_SONGS
    }

    fn description(&self) -> &str {
        "Search for songs by (partial) title."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            json!({
                "title": {
                    "type": "string",
                    "description": "Song title or part of it"
                }
            }),
            vec!["title"],
        )
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let title = required_str(&input, "title")?;
        debug!("Searching songs titled like '{}'", title);
        let tracks = self.catalog.search_by_title(title, DEFAULT_SONG_LIMIT).await?;
        Ok(json!({ "query": title, "tracks": tracks }))
    }
}

/// List tracks by artist
pub struct TracksByArtistTool {
    catalog: Arc<dyn CatalogStore>,
}

impl TracksByArtistTool {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ToolHandler for TracksByArtistTool {
    fn name(&self) -> &str {
        names::GET_TRACKS_BY_ARTIST
    }

    fn description(&self) -> &str {
        "Retrieve tracks by an artist (partial artist names match)."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            json!({
                "artist": {
                    "type": "string",
                    "description": "Artist name"
                }
            }),
            vec!["artist"],
        )
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let artist = required_str(&input, "artist")?;
        let tracks = self.catalog.search_by_artist(artist).await?;
        Ok(json!({ "artist": artist, "tracks": tracks }))
    }
}

/// List albums by artist
pub struct AlbumsByArtistTool {
    catalog: Arc<dyn CatalogStore>,
}

impl AlbumsByArtistTool {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ToolHandler for AlbumsByArtistTool {
    fn name(&self) -> &str {
        names::GET_ALBUMS_BY_ARTIST
    }

    fn description(&self) -> &str {
        "Retrieve albums by an artist (partial artist names match)."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            json!({
                "artist": {
                    "type": "string",
                    "description": "Artist name"
                }
            }),
            vec!["artist"],
        )
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let artist = required_str(&input, "artist")?;
        let albums = self.catalog.albums_by_artist(artist).await?;
        Ok(json!({ "artist": artist, "albums": albums }))
    }
}

/// Recommend tracks close to a reference track or an explicit embedding
pub struct SimilaritySearchTool {
    catalog: Arc<dyn CatalogStore>,
}

impl SimilaritySearchTool {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl ToolHandler for SimilaritySearchTool {
    fn name(&self) -> &str {
        names::SIMILARITY_SEARCH
    }

    fn description(&self) -> &str {
        "Find songs similar to a reference song title, or to an embedding vector."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            json!({
                "reference": {
                    "type": "string",
                    "description": "Title of the song to find similar songs for"
                },
                "vector": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "Embedding to search with when no reference title is given"
                },
                "k": {
                    "type": "integer",
                    "description": "How many songs to return (default 5)"
                }
            }),
            vec![],
        )
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let k = input
            .get("k")
            .and_then(|v| v.as_u64())
            .map(|k| (k as usize).clamp(1, MAX_SIMILAR_K))
            .unwrap_or(DEFAULT_SIMILAR_K);

        let (reference, exclude_id, vector) = if let Some(title) = input
            .get("reference")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
        {
            let track = self
                .catalog
                .find_track(title)
                .await?
                .ok_or_else(|| ToolError::NotFound(format!("No song matching '{}'", title.trim())))?;
            let vector = track.embedding.clone().ok_or_else(|| {
                ToolError::NotFound(format!("No similarity data for '{}'", track.name))
            })?;
            (Some(track.name), Some(track.id), vector)
        } else if let Some(values) = input.get("vector").and_then(|v| v.as_array()) {
            let vector = values
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect::<Option<Vec<f32>>>()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ToolError::Validation("'vector' must be a non-empty list of numbers".to_string()))?;
            (None, None, vector)
        } else {
            return Err(ToolError::Validation(
                "Provide either 'reference' or 'vector'".to_string(),
            ));
        };

        debug!("Similarity search (k={}, reference={:?})", k, reference);
        let mut results = self.catalog.similarity_search(&vector, k + 1).await?;
        results.retain(|r| Some(r.track.id) != exclude_id);
        results.truncate(k);

        let tracks: Vec<Value> = results
            .into_iter()
            .map(|r| json!({ "name": r.track.name, "artist": r.track.artist, "album": r.track.album, "score": r.score }))
            .collect();
        Ok(json!({ "reference": reference, "tracks": tracks }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_store::MusicStoreDb;

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: 1,
            conversation_id: "test".to_string(),
        }
    }

    async fn catalog() -> Arc<MusicStoreDb> {
        let db = MusicStoreDb::open_in_memory().unwrap();
        let queen = db.insert_artist("Queen").await.unwrap();
        let opera = db.insert_album("A Night at the Opera", queen).await.unwrap();
        db.insert_track("Bohemian Rhapsody", opera, Some("Rock"), Some(vec![0.9, 0.1, 0.0]))
            .await
            .unwrap();
        db.insert_track("Love of My Life", opera, Some("Rock"), Some(vec![0.8, 0.2, 0.1]))
            .await
            .unwrap();
        let amy = db.insert_artist("Amy Winehouse").await.unwrap();
        let back = db.insert_album("Back to Black", amy).await.unwrap();
        db.insert_track("Rehab", back, Some("Soul"), Some(vec![0.0, 0.2, 0.9]))
            .await
            .unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn test_similarity_excludes_reference() {
        let tool = SimilaritySearchTool::new(catalog().await);
        let out = tool
            .execute(&ctx(), json!({"reference": "Bohemian Rhapsody", "k": 1}))
            .await
            .unwrap();
        let tracks = out["tracks"].as_array().unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0]["name"], "Love of My Life");
        assert_eq!(out["reference"], "Bohemian Rhapsody");
    }

    #[tokio::test]
    async fn test_similarity_unknown_reference() {
        let tool = SimilaritySearchTool::new(catalog().await);
        let err = tool
            .execute(&ctx(), json!({"reference": "Not A Song"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_similarity_requires_input() {
        let tool = SimilaritySearchTool::new(catalog().await);
        let err = tool.execute(&ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[tokio::test]
    async fn test_tracks_and_albums_by_artist() {
        let db = catalog().await;
        let tracks = TracksByArtistTool::new(db.clone())
            .execute(&ctx(), json!({"artist": "queen"}))
            .await
            .unwrap();
        assert_eq!(tracks["tracks"].as_array().unwrap().len(), 2);

        let albums = AlbumsByArtistTool::new(db)
            .execute(&ctx(), json!({"artist": "Amy"}))
            .await
            .unwrap();
        assert_eq!(albums["albums"][0]["title"], "Back to Black");
    }

    #[tokio::test]
    async fn test_check_for_songs_missing_title() {
        let tool = CheckForSongsTool::new(catalog().await);
        let err = tool.execute(&ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
