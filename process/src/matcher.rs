use std::collections::{BTreeMap, HashMap};

use tracing::{debug, instrument, warn};

use crate::{
    config::MatchConfig,
    hashing::{Fingerprint, FingerprintHash},
    index::{FingerprintIndex, IndexEntry, Song, SongCatalog, SongId},
    Error, Result,
};

/// Offsets are tallied in buckets of this many seconds.
pub const OFFSET_BUCKET_SECONDS: f64 = 0.1;
const BUCKETS_PER_SECOND: f64 = 10.0;

/// A song whose stored fingerprints line up with the query.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub song_id: SongId,
    /// Offset bucket (multiples of [`OFFSET_BUCKET_SECONDS`]) to hit count.
    pub offset_histogram: HashMap<i64, u32>,
    /// `stored_time - sample_time` of the strongest bucket, in seconds.
    pub best_offset: f64,
    /// Hit count of the strongest bucket.
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    pub song: Song,
    pub score: u32,
    /// Where in the song the query starts, in seconds.
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Found(Identification),
    NoMatch,
}

pub fn offset_bucket(offset: f64) -> i64 {
    (offset / OFFSET_BUCKET_SECONDS).round() as i64
}

fn bucket_seconds(bucket: i64) -> f64 {
    bucket as f64 / BUCKETS_PER_SECOND
}

/// Builds one offset histogram per song from the index hits of `query` and
/// returns the songs whose strongest bucket reaches `score_threshold`,
/// best first.
pub fn rank_candidates(
    query: &[Fingerprint],
    hits: &HashMap<FingerprintHash, Vec<IndexEntry>>,
    score_threshold: u32,
) -> Vec<MatchCandidate> {
    let mut histograms: BTreeMap<SongId, HashMap<i64, u32>> = BTreeMap::new();

    for fingerprint in query {
        let Some(entries) = hits.get(&fingerprint.hash) else {
            continue;
        };
        for entry in entries {
            let bucket = offset_bucket(entry.anchor_time - fingerprint.anchor_time);
            *histograms
                .entry(entry.song_id)
                .or_default()
                .entry(bucket)
                .or_default() += 1;
        }
    }

    let mut candidates: Vec<MatchCandidate> = histograms
        .into_iter()
        .filter_map(|(song_id, offset_histogram)| {
            // most hits, earliest bucket on ties
            let (best_bucket, score) = offset_histogram
                .iter()
                .map(|(&bucket, &count)| (bucket, count))
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;

            Some(MatchCandidate {
                song_id,
                best_offset: bucket_seconds(best_bucket),
                score,
                offset_histogram,
            })
        })
        .filter(|candidate| candidate.score >= score_threshold)
        .collect();

    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.song_id.cmp(&b.song_id)));
    candidates
}

/// Identifies query fingerprints against an index, resolving the winner
/// through a catalog.
pub struct Matcher<'a, I, C> {
    index: &'a I,
    catalog: &'a C,
    config: MatchConfig,
}

impl<'a, I, C> Matcher<'a, I, C>
where
    I: FingerprintIndex,
    C: SongCatalog,
{
    pub fn new(index: &'a I, catalog: &'a C, config: MatchConfig) -> Self {
        Self {
            index,
            catalog,
            config,
        }
    }

    /// Every song above the score threshold, best first, straight from the
    /// index. Songs whose ingest has not committed are included; use
    /// [`Matcher::identify_all`] for anything shown to a user.
    #[instrument(skip_all, fields(query = query.len()), level = "trace")]
    pub async fn candidates(&self, query: &[Fingerprint]) -> Result<Vec<MatchCandidate>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut hashes: Vec<FingerprintHash> = query.iter().map(|f| f.hash).collect();
        hashes.sort_unstable();
        hashes.dedup();

        let hits = self.index.get_many(&hashes).await.map_err(Error::index)?;
        debug!(distinct = hashes.len(), matched = hits.len(), "looked up query hashes");

        Ok(rank_candidates(query, &hits, self.config.score_threshold))
    }

    /// The best matching song, or [`MatchOutcome::NoMatch`] when no candidate
    /// clears the threshold.
    #[instrument(skip_all, fields(query = query.len()), level = "debug")]
    pub async fn identify(&self, query: &[Fingerprint]) -> Result<MatchOutcome> {
        for candidate in self.candidates(query).await? {
            if let Some(found) = self.resolve(&candidate).await? {
                debug!(song_id = %found.song.id, score = found.score, offset = found.offset, "matched");
                return Ok(MatchOutcome::Found(found));
            }
        }

        Ok(MatchOutcome::NoMatch)
    }

    /// Every candidate with a complete catalog record, best first.
    #[instrument(skip_all, fields(query = query.len()), level = "debug")]
    pub async fn identify_all(&self, query: &[Fingerprint]) -> Result<Vec<Identification>> {
        let mut found = Vec::new();
        for candidate in self.candidates(query).await? {
            if let Some(identification) = self.resolve(&candidate).await? {
                found.push(identification);
            }
        }

        Ok(found)
    }

    async fn resolve(&self, candidate: &MatchCandidate) -> Result<Option<Identification>> {
        let song = self
            .catalog
            .get(candidate.song_id)
            .await
            .map_err(Error::catalog)?;

        if song.is_none() {
            warn!(song_id = %candidate.song_id, "candidate has no complete catalog record, skipping");
        }

        Ok(song.map(|song| Identification {
            song,
            score: candidate.score,
            offset: candidate.best_offset,
        }))
    }
}
