use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    hashing::{Fingerprint, FingerprintHash},
    index::{FingerprintIndex, IndexEntry, NewSong, Song, SongCatalog, SongId},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryStoreError {
    #[error("song {0} is not registered")]
    UnknownSong(SongId),
}

struct CatalogEntry {
    song: Song,
    ingested: bool,
}

#[derive(Default)]
struct Inner {
    songs: BTreeMap<SongId, CatalogEntry>,
    by_title_artist: HashMap<(String, String), SongId>,
    hashes: HashMap<FingerprintHash, Vec<IndexEntry>>,
    hashes_by_song: HashMap<SongId, Vec<FingerprintHash>>,
    next_id: i64,
}

/// Catalog and index held in process memory behind a single lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored fingerprints for `song_id`.
    pub fn fingerprint_count(&self, song_id: SongId) -> usize {
        self.inner
            .read()
            .hashes_by_song
            .get(&song_id)
            .map_or(0, Vec::len)
    }

    /// Every ingested song, newest first.
    pub fn songs(&self) -> Vec<Song> {
        self.inner
            .read()
            .songs
            .values()
            .rev()
            .filter(|entry| entry.ingested)
            .map(|entry| entry.song.clone())
            .collect()
    }
}

impl Inner {
    fn remove_fingerprints(&mut self, song_id: SongId) {
        let Some(previous) = self.hashes_by_song.remove(&song_id) else {
            return;
        };

        for hash in previous {
            if let Some(entries) = self.hashes.get_mut(&hash) {
                entries.retain(|entry| entry.song_id != song_id);
                if entries.is_empty() {
                    self.hashes.remove(&hash);
                }
            }
        }
    }
}

impl FingerprintIndex for MemoryStore {
    type Error = MemoryStoreError;

    #[instrument(skip(self, fingerprints), fields(fingerprints = fingerprints.len()), level = "trace")]
    async fn put_many(&self, song_id: SongId, fingerprints: &[Fingerprint]) -> Result<(), Self::Error> {
        let mut inner = self.inner.write();
        if !inner.songs.contains_key(&song_id) {
            return Err(MemoryStoreError::UnknownSong(song_id));
        }

        inner.remove_fingerprints(song_id);
        for fingerprint in fingerprints {
            inner.hashes.entry(fingerprint.hash).or_default().push(IndexEntry {
                song_id,
                anchor_time: fingerprint.anchor_time,
            });
        }
        inner
            .hashes_by_song
            .insert(song_id, fingerprints.iter().map(|f| f.hash).collect());

        debug!(%song_id, "stored fingerprint set");
        Ok(())
    }

    async fn get(&self, hash: &FingerprintHash) -> Result<Vec<IndexEntry>, Self::Error> {
        Ok(self.inner.read().hashes.get(hash).cloned().unwrap_or_default())
    }
}

impl SongCatalog for MemoryStore {
    type Error = MemoryStoreError;

    async fn add(&self, song: &NewSong) -> Result<SongId, Self::Error> {
        let mut inner = self.inner.write();
        let key = (song.title.clone(), song.artist.clone());
        if let Some(id) = inner.by_title_artist.get(&key) {
            return Ok(*id);
        }

        inner.next_id += 1;
        let id = SongId(inner.next_id);
        inner.by_title_artist.insert(key, id);
        inner.songs.insert(
            id,
            CatalogEntry {
                song: Song {
                    id,
                    title: song.title.clone(),
                    artist: song.artist.clone(),
                    duration: song.duration,
                    thumbnail_url: song.thumbnail_url.clone(),
                    source_url: song.source_url.clone(),
                },
                ingested: false,
            },
        );

        Ok(id)
    }

    async fn get(&self, id: SongId) -> Result<Option<Song>, Self::Error> {
        Ok(self
            .inner
            .read()
            .songs
            .get(&id)
            .filter(|entry| entry.ingested)
            .map(|entry| entry.song.clone()))
    }

    async fn mark_ingested(&self, id: SongId) -> Result<(), Self::Error> {
        match self.inner.write().songs.get_mut(&id) {
            Some(entry) => {
                entry.ingested = true;
                Ok(())
            }
            None => Err(MemoryStoreError::UnknownSong(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::Triple;

    fn new_song(title: &str) -> NewSong {
        NewSong {
            title: title.to_string(),
            artist: "artist".to_string(),
            duration: 180,
            thumbnail_url: String::new(),
            source_url: String::new(),
        }
    }

    fn hash(n: u32) -> FingerprintHash {
        Triple {
            anchor_frequency: n,
            target_frequency: n,
            delta_centis: 0,
        }
        .hash()
    }

    #[tokio::test]
    async fn add_is_idempotent_on_title_and_artist() {
        let store = MemoryStore::new();
        let first = store.add(&new_song("a")).await.unwrap();
        let again = store.add(&new_song("a")).await.unwrap();
        let other = store.add(&new_song("b")).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn songs_hidden_until_ingested() {
        let store = MemoryStore::new();
        let id = store.add(&new_song("a")).await.unwrap();
        assert_eq!(SongCatalog::get(&store, id).await.unwrap(), None);
        assert!(store.songs().is_empty());

        store.mark_ingested(id).await.unwrap();
        let song = SongCatalog::get(&store, id).await.unwrap().unwrap();
        assert_eq!(song.title, "a");
        assert_eq!(store.songs().len(), 1);
    }

    #[tokio::test]
    async fn put_many_replaces_previous_set() {
        let store = MemoryStore::new();
        let id = store.add(&new_song("a")).await.unwrap();

        let first = vec![
            Fingerprint { hash: hash(1), anchor_time: 1.0 },
            Fingerprint { hash: hash(2), anchor_time: 2.0 },
        ];
        store.put_many(id, &first).await.unwrap();

        let second = vec![Fingerprint { hash: hash(2), anchor_time: 3.0 }];
        store.put_many(id, &second).await.unwrap();

        assert!(FingerprintIndex::get(&store, &hash(1)).await.unwrap().is_empty());
        assert_eq!(
            FingerprintIndex::get(&store, &hash(2)).await.unwrap(),
            vec![IndexEntry { song_id: id, anchor_time: 3.0 }]
        );
        assert_eq!(store.fingerprint_count(id), 1);
    }

    #[tokio::test]
    async fn put_many_keeps_duplicates() {
        let store = MemoryStore::new();
        let id = store.add(&new_song("a")).await.unwrap();
        let repeated = vec![Fingerprint { hash: hash(7), anchor_time: 1.0 }; 3];
        store.put_many(id, &repeated).await.unwrap();

        assert_eq!(FingerprintIndex::get(&store, &hash(7)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn put_many_for_unknown_song_fails() {
        let store = MemoryStore::new();
        let result = store
            .put_many(SongId(42), &[Fingerprint { hash: hash(1), anchor_time: 0.0 }])
            .await;

        assert_eq!(result, Err(MemoryStoreError::UnknownSong(SongId(42))));
        assert!(FingerprintIndex::get(&store, &hash(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_many_skips_misses() {
        let store = MemoryStore::new();
        let id = store.add(&new_song("a")).await.unwrap();
        store
            .put_many(id, &[Fingerprint { hash: hash(1), anchor_time: 0.5 }])
            .await
            .unwrap();

        let found = store.get_many(&[hash(1), hash(2)]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&hash(1)][0].anchor_time, 0.5);
    }
}
