//! SQLite database layer for customers, the music catalog, and saved conversations

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::models::{Album, Profile, ProfileField, SavedConversation, ScoredTrack, Track};
use crate::vector::cosine_similarity;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS customers (
        CustomerId INTEGER PRIMARY KEY,
        FirstName TEXT NOT NULL,
        LastName TEXT NOT NULL,
        Company TEXT,
        Address TEXT,
        City TEXT,
        State TEXT,
        Country TEXT,
        PostalCode TEXT,
        Phone TEXT,
        Fax TEXT,
        Email TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS artists (
        ArtistId INTEGER PRIMARY KEY AUTOINCREMENT,
        Name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS albums (
        AlbumId INTEGER PRIMARY KEY AUTOINCREMENT,
        Title TEXT NOT NULL,
        ArtistId INTEGER NOT NULL REFERENCES artists(ArtistId)
    );
    CREATE TABLE IF NOT EXISTS tracks (
        TrackId INTEGER PRIMARY KEY AUTOINCREMENT,
        Name TEXT NOT NULL,
        AlbumId INTEGER NOT NULL REFERENCES albums(AlbumId),
        Genre TEXT,
        Embedding TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_albums_artist ON albums(ArtistId);
    CREATE INDEX IF NOT EXISTS idx_tracks_album ON tracks(AlbumId);
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        customer_id INTEGER NOT NULL,
        state TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_customer ON conversations(customer_id);
";

const TRACK_SELECT: &str = "
    SELECT t.TrackId, t.Name, ar.Name, al.Title, t.Genre, t.Embedding
    FROM tracks t
    JOIN albums al ON t.AlbumId = al.AlbumId
    JOIN artists ar ON al.ArtistId = ar.ArtistId";

/// SQLite database wrapper (thread-safe via Arc<Mutex>)
#[derive(Clone)]
pub struct MusicStoreDb {
    conn: Arc<Mutex<Connection>>,
}

impl MusicStoreDb {
    /// Open (or create) a database file and ensure the schema exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;
        info!("Initializing music store database at {:?}", path.as_ref());
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests and throwaway sessions
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create music store schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
        conn.lock().unwrap_or_else(|poisoned| {
            warn!("Database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Insert or replace a customer row
    pub async fn insert_customer(&self, profile: &Profile) -> Result<i64> {
        let conn = Arc::clone(&self.conn);
        let p = profile.clone();

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            conn.execute(
                "INSERT OR REPLACE INTO customers
                 (CustomerId, FirstName, LastName, Company, Address, City, State, Country,
                  PostalCode, Phone, Fax, Email)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    p.customer_id,
                    p.first_name,
                    p.last_name,
                    p.company,
                    p.address,
                    p.city,
                    p.state,
                    p.country,
                    p.postal_code,
                    p.phone,
                    p.fax,
                    p.email,
                ],
            )?;
            debug!("Inserted customer {}", p.customer_id);
            Ok(p.customer_id)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    pub async fn get_customer(&self, customer_id: i64) -> Result<Option<Profile>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            let profile = conn
                .query_row(
                    "SELECT CustomerId, FirstName, LastName, Company, Address, City, State,
                            Country, PostalCode, Phone, Fax, Email
                     FROM customers WHERE CustomerId = ?1",
                    params![customer_id],
                    |row| {
                        Ok(Profile {
                            customer_id: row.get(0)?,
                            first_name: row.get(1)?,
                            last_name: row.get(2)?,
                            company: row.get(3)?,
                            address: row.get(4)?,
                            city: row.get(5)?,
                            state: row.get(6)?,
                            country: row.get(7)?,
                            postal_code: row.get(8)?,
                            phone: row.get(9)?,
                            fax: row.get(10)?,
                            email: row.get(11)?,
                        })
                    },
                )
                .optional()?;
            Ok(profile)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Apply field changes to one customer, returning the number of rows affected
    pub async fn update_customer(
        &self,
        customer_id: i64,
        changes: Vec<(ProfileField, String)>,
    ) -> Result<usize> {
        if changes.is_empty() {
            return Ok(0);
        }
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            // Column names come from the ProfileField allow-list, never from input.
            let assignments: Vec<String> = changes
                .iter()
                .enumerate()
                .map(|(i, (field, _))| format!("{} = ?{}", field.column(), i + 1))
                .collect();
            let sql = format!(
                "UPDATE customers SET {} WHERE CustomerId = ?{}",
                assignments.join(", "),
                changes.len() + 1
            );

            let mut values: Vec<rusqlite::types::Value> = changes
                .into_iter()
                .map(|(_, value)| rusqlite::types::Value::Text(value))
                .collect();
            values.push(rusqlite::types::Value::Integer(customer_id));

            let conn = Self::lock(&conn);
            let rows = conn.execute(&sql, params_from_iter(values))?;
            debug!("Updated customer {} ({} rows)", customer_id, rows);
            Ok(rows)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    pub async fn insert_artist(&self, name: &str) -> Result<i64> {
        let conn = Arc::clone(&self.conn);
        let name = name.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            conn.execute("INSERT INTO artists (Name) VALUES (?1)", params![&name])?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    pub async fn insert_album(&self, title: &str, artist_id: i64) -> Result<i64> {
        let conn = Arc::clone(&self.conn);
        let title = title.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            conn.execute(
                "INSERT INTO albums (Title, ArtistId) VALUES (?1, ?2)",
                params![&title, artist_id],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    pub async fn insert_track(
        &self,
        name: &str,
        album_id: i64,
        genre: Option<&str>,
        embedding: Option<Vec<f32>>,
    ) -> Result<i64> {
        let conn = Arc::clone(&self.conn);
        let name = name.to_owned();
        let genre = genre.map(str::to_owned);

        tokio::task::spawn_blocking(move || {
            let embedding_json = embedding.map(|e| serde_json::to_string(&e)).transpose()?;
            let conn = Self::lock(&conn);
            conn.execute(
                "INSERT INTO tracks (Name, AlbumId, Genre, Embedding) VALUES (?1, ?2, ?3, ?4)",
                params![&name, album_id, genre, embedding_json],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Tracks whose artist name contains `artist` (case-insensitive)
    pub async fn tracks_by_artist(&self, artist: &str) -> Result<Vec<Track>> {
        let sql = format!(
            "{} WHERE LOWER(ar.Name) LIKE '%' || LOWER(?1) || '%' ORDER BY ar.Name, al.Title, t.TrackId",
            TRACK_SELECT
        );
        self.query_tracks(sql, artist.trim().to_owned(), None).await
    }

    /// Tracks whose title contains `title` (case-insensitive)
    pub async fn search_tracks(&self, title: &str, limit: usize) -> Result<Vec<Track>> {
        let sql = format!(
            "{} WHERE LOWER(t.Name) LIKE '%' || LOWER(?1) || '%' ORDER BY t.TrackId",
            TRACK_SELECT
        );
        self.query_tracks(sql, title.trim().to_owned(), Some(limit)).await
    }

    /// Exact (case-insensitive) title match, falling back to the first partial match
    pub async fn find_track(&self, title: &str) -> Result<Option<Track>> {
        let exact = format!("{} WHERE LOWER(t.Name) = LOWER(?1) ORDER BY t.TrackId", TRACK_SELECT);
        let mut found = self.query_tracks(exact, title.trim().to_owned(), Some(1)).await?;
        if found.is_empty() {
            found = self.search_tracks(title, 1).await?;
        }
        Ok(found.into_iter().next())
    }

    async fn query_tracks(&self, sql: String, arg: String, limit: Option<usize>) -> Result<Vec<Track>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![&arg], row_to_track)?;
            let mut tracks = Vec::new();
            for row in rows {
                tracks.push(row?);
                if limit.is_some_and(|l| tracks.len() >= l) {
                    break;
                }
            }
            Ok(tracks)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Albums whose artist name contains `artist` (case-insensitive)
    pub async fn albums_by_artist(&self, artist: &str) -> Result<Vec<Album>> {
        let conn = Arc::clone(&self.conn);
        let artist = artist.trim().to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            let mut stmt = conn.prepare(
                "SELECT al.AlbumId, al.Title, ar.Name
                 FROM albums al
                 JOIN artists ar ON al.ArtistId = ar.ArtistId
                 WHERE LOWER(ar.Name) LIKE '%' || LOWER(?1) || '%'
                 ORDER BY ar.Name, al.Title",
            )?;
            let albums = stmt
                .query_map(params![&artist], |row| {
                    Ok(Album {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        artist: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(albums)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Nearest tracks to `query` by cosine similarity over stored embeddings
    pub async fn similar_tracks(&self, query: &[f32], k: usize) -> Result<Vec<ScoredTrack>> {
        let conn = Arc::clone(&self.conn);
        let query = query.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            let sql = format!("{} WHERE t.Embedding IS NOT NULL", TRACK_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let mut scored: Vec<ScoredTrack> = stmt
                .query_map([], row_to_track)?
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .filter_map(|track| {
                    let score = cosine_similarity(&query, track.embedding.as_deref()?);
                    Some(ScoredTrack { track, score })
                })
                .collect();
            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.track.id.cmp(&b.track.id))
            });
            scored.truncate(k);
            Ok(scored)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Insert or overwrite a saved conversation
    pub async fn save_conversation(&self, id: &str, customer_id: i64, state: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let id = id.to_owned();
        let state = state.to_owned();

        tokio::task::spawn_blocking(move || {
            let now = Utc::now().to_rfc3339();
            let conn = Self::lock(&conn);
            conn.execute(
                "INSERT INTO conversations (id, customer_id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
                params![&id, customer_id, &state, now],
            )?;
            debug!("Saved conversation {}", id);
            Ok(())
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    pub async fn load_conversation(&self, id: &str) -> Result<Option<SavedConversation>> {
        let conn = Arc::clone(&self.conn);
        let id = id.to_owned();

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            let saved = conn
                .query_row(
                    "SELECT id, customer_id, state, created_at, updated_at
                     FROM conversations WHERE id = ?1",
                    params![&id],
                    row_to_conversation,
                )
                .optional()?;
            Ok(saved)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Most recently updated conversations, optionally for one customer
    pub async fn list_conversations(
        &self,
        customer_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SavedConversation>> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            let mut stmt = conn.prepare(
                "SELECT id, customer_id, state, created_at, updated_at
                 FROM conversations
                 WHERE ?1 IS NULL OR customer_id = ?1
                 ORDER BY updated_at DESC
                 LIMIT ?2",
            )?;
            let saved = stmt
                .query_map(params![customer_id, limit as i64], row_to_conversation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(saved)
        })
        .await
        .context("spawn_blocking task panicked")?
    }
}

fn row_to_track(row: &Row<'_>) -> rusqlite::Result<Track> {
    let embedding_str: Option<String> = row.get(5)?;
    let embedding = embedding_str
        .map(|s| serde_json::from_str::<Vec<f32>>(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Track {
        id: row.get(0)?,
        name: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        genre: row.get(4)?,
        embedding,
    })
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<SavedConversation> {
    Ok(SavedConversation {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        state: row.get(2)?,
        created_at: row.get::<_, String>(3)?.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: row.get::<_, String>(4)?.parse().unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> Result<MusicStoreDb> {
        let db = MusicStoreDb::open_in_memory()?;
        let queen = db.insert_artist("Queen").await?;
        let opera = db.insert_album("A Night at the Opera", queen).await?;
        db.insert_track("Bohemian Rhapsody", opera, Some("Rock"), Some(vec![0.9, 0.1, 0.0]))
            .await?;
        db.insert_track("Love of My Life", opera, Some("Rock"), Some(vec![0.8, 0.2, 0.1]))
            .await?;
        let amy = db.insert_artist("Amy Winehouse").await?;
        let back = db.insert_album("Back to Black", amy).await?;
        db.insert_track("Rehab", back, Some("Soul"), Some(vec![0.0, 0.2, 0.9]))
            .await?;
        Ok(db)
    }

    #[tokio::test]
    async fn test_customer_roundtrip_and_update() -> Result<()> {
        let db = MusicStoreDb::open_in_memory()?;
        db.insert_customer(&Profile::new(7, "Ada", "Lovelace", "ada@example.com"))
            .await?;

        let rows = db
            .update_customer(7, vec![(ProfileField::Email, "ada@new.example".to_string())])
            .await?;
        assert_eq!(rows, 1);

        let profile = db.get_customer(7).await?.unwrap();
        assert_eq!(profile.email, "ada@new.example");
        assert!(db.get_customer(8).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_missing_customer_affects_nothing() -> Result<()> {
        let db = MusicStoreDb::open_in_memory()?;
        let rows = db
            .update_customer(99, vec![(ProfileField::Phone, "555-0100-11".to_string())])
            .await?;
        assert_eq!(rows, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_catalog_queries() -> Result<()> {
        let db = seeded().await?;

        let tracks = db.tracks_by_artist("queen").await?;
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].album.as_deref(), Some("A Night at the Opera"));

        let albums = db.albums_by_artist("wine").await?;
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].title, "Back to Black");

        let found = db.search_tracks("reh", 10).await?;
        assert_eq!(found.len(), 1);

        let track = db.find_track("bohemian rhapsody").await?.unwrap();
        assert_eq!(track.embedding.as_deref(), Some(&[0.9, 0.1, 0.0][..]));
        Ok(())
    }

    #[tokio::test]
    async fn test_similar_tracks_ranked() -> Result<()> {
        let db = seeded().await?;
        let results = db.similar_tracks(&[0.9, 0.1, 0.0], 2).await?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].track.name, "Bohemian Rhapsody");
        assert_eq!(results[1].track.name, "Love of My Life");
        Ok(())
    }

    #[tokio::test]
    async fn test_conversation_persistence() -> Result<()> {
        let db = MusicStoreDb::open_in_memory()?;
        db.save_conversation("c1", 7, "{\"v\":1}").await?;
        db.save_conversation("c1", 7, "{\"v\":2}").await?;
        db.save_conversation("c2", 8, "{}").await?;

        let saved = db.load_conversation("c1").await?.unwrap();
        assert_eq!(saved.state, "{\"v\":2}");

        assert_eq!(db.list_conversations(Some(7), 10).await?.len(), 1);
        assert_eq!(db.list_conversations(None, 10).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_backed_database() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("store.db");
        {
            let db = MusicStoreDb::new(&path)?;
            db.insert_customer(&Profile::new(1, "Grace", "Hopper", "grace@example.com"))
                .await?;
        }
        let reopened = MusicStoreDb::new(&path)?;
        assert!(reopened.get_customer(1).await?.is_some());
        Ok(())
    }
}
