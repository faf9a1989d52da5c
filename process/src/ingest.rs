use tracing::{info, instrument};

use crate::{
    hashing::Fingerprint,
    index::{FingerprintIndex, NewSong, SongCatalog, SongId},
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted { song_id: SongId, fingerprints: usize },
    /// The song was already fully ingested; nothing was written.
    AlreadyPresent { song_id: SongId },
}

impl IngestOutcome {
    pub fn song_id(&self) -> SongId {
        match self {
            IngestOutcome::Inserted { song_id, .. } | IngestOutcome::AlreadyPresent { song_id } => {
                *song_id
            }
        }
    }
}

/// Registers `song` and stores its fingerprints.
///
/// The catalog record stays hidden until the whole fingerprint set is
/// committed. A failed write leaves it hidden, and a retry replaces whatever
/// the index holds for the song.
#[instrument(skip_all, fields(title = %song.title, artist = %song.artist), level = "debug")]
pub async fn ingest<C, I>(
    catalog: &C,
    index: &I,
    song: &NewSong,
    fingerprints: &[Fingerprint],
) -> Result<IngestOutcome>
where
    C: SongCatalog,
    I: FingerprintIndex,
{
    let song_id = catalog.add(song).await.map_err(Error::catalog)?;

    if catalog.get(song_id).await.map_err(Error::catalog)?.is_some() {
        info!(%song_id, "song already ingested");
        return Ok(IngestOutcome::AlreadyPresent { song_id });
    }

    index
        .put_many(song_id, fingerprints)
        .await
        .map_err(Error::index)?;
    catalog
        .mark_ingested(song_id)
        .await
        .map_err(Error::catalog)?;

    info!(%song_id, fingerprints = fingerprints.len(), "ingested song");
    Ok(IngestOutcome::Inserted {
        song_id,
        fingerprints: fingerprints.len(),
    })
}
