//! Contracts for the storage collaborators the pipeline reads from and writes
//! to. Implementations own their connections; callers inject them by reference.

use std::{collections::HashMap, fmt, future::Future};

use serde::{Deserialize, Serialize};

use crate::hashing::{Fingerprint, FingerprintHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SongId(pub i64);

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    /// Whole seconds.
    pub duration: u32,
    pub thumbnail_url: String,
    pub source_url: String,
}

/// Metadata for a song that is about to be ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSong {
    pub title: String,
    pub artist: String,
    pub duration: u32,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub source_url: String,
}

/// One stored occurrence of a hash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub song_id: SongId,
    pub anchor_time: f64,
}

pub trait FingerprintIndex: Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Replaces the fingerprint set of `song_id`. Either every fingerprint
    /// becomes visible or none does.
    fn put_many(
        &self,
        song_id: SongId,
        fingerprints: &[Fingerprint],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Every stored occurrence of exactly `hash`.
    fn get(
        &self,
        hash: &FingerprintHash,
    ) -> impl Future<Output = Result<Vec<IndexEntry>, Self::Error>> + Send;

    /// Looks up several hashes at once. Hashes without hits may be absent
    /// from the returned map.
    fn get_many(
        &self,
        hashes: &[FingerprintHash],
    ) -> impl Future<Output = Result<HashMap<FingerprintHash, Vec<IndexEntry>>, Self::Error>> + Send
    {
        async move {
            let lookups = hashes
                .iter()
                .map(|hash| async move { self.get(hash).await.map(|hits| (*hash, hits)) });
            let found = futures::future::try_join_all(lookups).await?;

            Ok(found.into_iter().filter(|(_, hits)| !hits.is_empty()).collect())
        }
    }
}

pub trait SongCatalog: Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Registers a song, or returns the id of the song already registered
    /// under the same title and artist.
    fn add(&self, song: &NewSong) -> impl Future<Output = Result<SongId, Self::Error>> + Send;

    /// The song, if it exists and its fingerprints are fully committed.
    fn get(&self, id: SongId) -> impl Future<Output = Result<Option<Song>, Self::Error>> + Send;

    /// Makes a song visible to [`SongCatalog::get`].
    fn mark_ingested(&self, id: SongId) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
