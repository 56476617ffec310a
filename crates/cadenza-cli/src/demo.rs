//! Demo data for `cadenza seed`

use anyhow::Result;
use cadenza_store::{MusicStoreDb, Profile, ProfileField};
use tracing::info;

/// (track, genre, embedding). Embedding axes: rock, ballad, soul, jazz.
type DemoTrack = (&'static str, &'static str, [f32; 4]);

struct DemoAlbum {
    artist: &'static str,
    title: &'static str,
    tracks: &'static [DemoTrack],
}

const CATALOG: &[DemoAlbum] = &[
    DemoAlbum {
        artist: "Queen",
        title: "A Night at the Opera",
        tracks: &[
            ("Bohemian Rhapsody", "Rock", [0.92, 0.55, 0.05, 0.10]),
            ("Love of My Life", "Rock", [0.55, 0.95, 0.15, 0.05]),
            ("You're My Best Friend", "Rock", [0.80, 0.40, 0.20, 0.05]),
        ],
    },
    DemoAlbum {
        artist: "Queen",
        title: "News of the World",
        tracks: &[
            ("We Will Rock You", "Rock", [0.97, 0.05, 0.05, 0.02]),
            ("We Are the Champions", "Rock", [0.85, 0.50, 0.10, 0.05]),
        ],
    },
    DemoAlbum {
        artist: "AC/DC",
        title: "Back in Black",
        tracks: &[
            ("Hells Bells", "Rock", [0.99, 0.02, 0.03, 0.01]),
            ("Back in Black", "Rock", [0.98, 0.03, 0.08, 0.01]),
            ("You Shook Me All Night Long", "Rock", [0.95, 0.10, 0.10, 0.02]),
        ],
    },
    DemoAlbum {
        artist: "Amy Winehouse",
        title: "Back to Black",
        tracks: &[
            ("Rehab", "R&B/Soul", [0.20, 0.15, 0.95, 0.30]),
            ("Back to Black", "R&B/Soul", [0.15, 0.60, 0.90, 0.35]),
            ("Tears Dry on Their Own", "R&B/Soul", [0.15, 0.35, 0.92, 0.25]),
        ],
    },
    DemoAlbum {
        artist: "Miles Davis",
        title: "Kind of Blue",
        tracks: &[
            ("So What", "Jazz", [0.02, 0.20, 0.15, 0.99]),
            ("Blue in Green", "Jazz", [0.01, 0.70, 0.20, 0.95]),
        ],
    },
];

#[derive(Debug, Default)]
pub struct SeedSummary {
    pub customers: usize,
    pub albums: usize,
    pub tracks: usize,
}

fn demo_customers() -> Vec<Profile> {
    let mut ada =
        Profile::new(1, "Ada", "Lovelace", "ada@example.com").with_phone("+44 20 7946 0018");
    ada.set(ProfileField::Address, "12 St James's Square");
    ada.set(ProfileField::City, "London");
    ada.set(ProfileField::Country, "United Kingdom");
    ada.set(ProfileField::PostalCode, "SW1Y 4JH");

    let mut grace = Profile::new(2, "Grace", "Hopper", "grace@example.com");
    grace.set(ProfileField::City, "Arlington");
    grace.set(ProfileField::State, "VA");
    grace.set(ProfileField::Country, "USA");

    vec![ada, grace]
}

/// Insert the demo customers, and the catalog unless it is already present
pub async fn seed(db: &MusicStoreDb) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for profile in demo_customers() {
        db.insert_customer(&profile).await?;
        summary.customers += 1;
    }

    if !db.tracks_by_artist("Queen").await?.is_empty() {
        info!("Demo catalog already present, skipping");
        return Ok(summary);
    }

    let mut artist_ids: Vec<(&str, i64)> = Vec::new();
    for album in CATALOG {
        let artist_id = match artist_ids.iter().find(|(name, _)| *name == album.artist) {
            Some((_, id)) => *id,
            None => {
                let id = db.insert_artist(album.artist).await?;
                artist_ids.push((album.artist, id));
                id
            }
        };
        let album_id = db.insert_album(album.title, artist_id).await?;
        summary.albums += 1;

        for (name, genre, embedding) in album.tracks {
            db.insert_track(name, album_id, Some(*genre), Some(embedding.to_vec()))
                .await?;
            summary.tracks += 1;
        }
    }

    info!(
        "Seeded {} customers, {} albums, {} tracks",
        summary.customers, summary.albums, summary.tracks
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_is_repeatable() {
        let db = MusicStoreDb::open_in_memory().unwrap();

        let first = seed(&db).await.unwrap();
        assert_eq!(first.customers, 2);
        assert_eq!(first.albums, 5);
        assert_eq!(first.tracks, 13);

        let second = seed(&db).await.unwrap();
        assert_eq!(second.tracks, 0);
        assert_eq!(db.tracks_by_artist("Queen").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_seeded_catalog_supports_similarity() {
        let db = MusicStoreDb::open_in_memory().unwrap();
        seed(&db).await.unwrap();

        let reference = db.find_track("Back in Black").await.unwrap().unwrap();
        let embedding = reference.embedding.unwrap();
        let similar = db.similar_tracks(&embedding, 3).await.unwrap();
        assert_eq!(similar[0].track.name, "Back in Black");
        assert!(similar.iter().all(|s| s.track.genre.as_deref() == Some("Rock")));

        let ada = db.get_customer(1).await.unwrap().unwrap();
        assert_eq!(ada.city.as_deref(), Some("London"));
    }
}
