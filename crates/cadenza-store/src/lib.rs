//! Persistence layer for cadenza
//!
//! This crate provides:
//! - SQLite storage for customers, the music catalog, and saved conversations
//! - Embedding similarity helpers for catalog search

pub mod models;
pub mod sqlite;
pub mod vector;

pub use models::{Album, Profile, ProfileField, SavedConversation, ScoredTrack, Track};
pub use sqlite::MusicStoreDb;
pub use vector::cosine_similarity;
