use std::collections::HashMap;

use process::{
    Fingerprint, FingerprintHash, FingerprintIndex, IndexEntry, IngestOutcome, NewSong, Song,
    SongCatalog, SongId,
};
use tracing::{debug, instrument};

pub mod models;

/// Hashes sent per `any($1)` lookup.
const LOOKUP_BATCH: usize = 1_000;

const SCHEMA: &[&str] = &[
    "
    create table if not exists songs (
        id bigserial primary key,
        title text not null,
        artist text not null,
        duration_secs integer not null,
        thumbnail_url text not null default '',
        source_url text not null default '',
        ingested boolean not null default false,
        created_at timestamptz not null default now(),
        unique (title, artist)
    )
    ",
    "
    create table if not exists fingerprints (
        hash bytea not null,
        song_id bigint not null references songs(id) on delete cascade,
        anchor_time double precision not null
    )
    ",
    "create index if not exists fingerprints_hash_idx on fingerprints(hash)",
    "create index if not exists fingerprints_song_idx on fingerprints(song_id)",
];

pub struct Database {
    pool: sqlx::Pool<sqlx::Postgres>,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = sqlx::PgPool::connect(url).await?;

        Ok(Self { pool })
    }

    /// Creates the tables and indexes if they do not exist yet.
    #[instrument(skip(self), level = "debug")]
    pub async fn setup(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Ingested songs, newest first.
    pub async fn library(&self) -> Result<Vec<models::LibraryEntry>, sqlx::Error> {
        let rows: Vec<models::SongRow> = sqlx::query_as(
            "
            select id, title, artist, duration_secs, thumbnail_url, source_url, created_at
            from songs
            where ingested
            order by id desc
        ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Registers the song and commits its fingerprints; see [`process::ingest`].
    pub async fn insert_new_song(
        &self,
        metadata: &NewSong,
        fingerprints: &[Fingerprint],
    ) -> process::Result<IngestOutcome> {
        process::ingest(self, self, metadata, fingerprints).await
    }
}

/// One line of the `copy ... from stdin` payload for the fingerprints table.
fn copy_row(song_id: SongId, fingerprint: &Fingerprint) -> String {
    format!(
        "{}|\\x{}|{}\n",
        song_id.0,
        fingerprint.hash.to_hex(),
        fingerprint.anchor_time
    )
}

fn decode_hash(bytes: &[u8]) -> Result<FingerprintHash, sqlx::Error> {
    FingerprintHash::try_from(bytes).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

impl FingerprintIndex for Database {
    type Error = sqlx::Error;

    #[instrument(skip(self, fingerprints), fields(fingerprints = fingerprints.len()), level = "trace")]
    async fn put_many(&self, song_id: SongId, fingerprints: &[Fingerprint]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // serializes concurrent ingests of the same song
        sqlx::query("select id from songs where id = $1 for update")
            .bind(song_id.0)
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("delete from fingerprints where song_id = $1")
            .bind(song_id.0)
            .execute(&mut *tx)
            .await?;

        let mut copy_in = tx
            .copy_in_raw(
                "copy fingerprints(song_id, hash, anchor_time) from stdin with (format csv, delimiter '|', header false)",
            )
            .await?;
        for fingerprint in fingerprints {
            copy_in
                .send(copy_row(song_id, fingerprint).as_bytes())
                .await?;
        }
        let rows_affected = copy_in.finish().await?;
        tx.commit().await?;
        debug!(n_rows = rows_affected, "affected rows");

        Ok(())
    }

    async fn get(&self, hash: &FingerprintHash) -> Result<Vec<IndexEntry>, sqlx::Error> {
        let rows: Vec<(i64, f64)> =
            sqlx::query_as("select song_id, anchor_time from fingerprints where hash = $1")
                .bind(&hash.as_bytes()[..])
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(song_id, anchor_time)| IndexEntry {
                song_id: SongId(song_id),
                anchor_time,
            })
            .collect())
    }

    #[instrument(skip_all, fields(hashes = hashes.len()), level = "trace")]
    async fn get_many(
        &self,
        hashes: &[FingerprintHash],
    ) -> Result<HashMap<FingerprintHash, Vec<IndexEntry>>, sqlx::Error> {
        let mut found: HashMap<FingerprintHash, Vec<IndexEntry>> = HashMap::new();

        for batch in hashes.chunks(LOOKUP_BATCH) {
            let keys: Vec<Vec<u8>> = batch.iter().map(|hash| hash.as_bytes().to_vec()).collect();
            let rows: Vec<(Vec<u8>, i64, f64)> = sqlx::query_as(
                "select hash, song_id, anchor_time from fingerprints where hash = any($1)",
            )
            .bind(keys)
            .fetch_all(&self.pool)
            .await?;

            for (hash, song_id, anchor_time) in rows {
                found.entry(decode_hash(&hash)?).or_default().push(IndexEntry {
                    song_id: SongId(song_id),
                    anchor_time,
                });
            }
        }

        debug!(matched = found.len(), "batched hash lookup");
        Ok(found)
    }
}

impl SongCatalog for Database {
    type Error = sqlx::Error;

    #[instrument(skip(self), level = "trace")]
    async fn add(&self, song: &NewSong) -> Result<SongId, sqlx::Error> {
        // the no-op update makes `returning` yield the existing row on conflict
        let (id,): (i64,) = sqlx::query_as(
            "
            insert into songs(title, artist, duration_secs, thumbnail_url, source_url)
            values ($1, $2, $3, $4, $5)
            on conflict (title, artist) do update set title = excluded.title
            returning id
        ",
        )
        .bind(&song.title)
        .bind(&song.artist)
        .bind(song.duration.min(i32::MAX as u32) as i32)
        .bind(&song.thumbnail_url)
        .bind(&song.source_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(SongId(id))
    }

    async fn get(&self, id: SongId) -> Result<Option<Song>, sqlx::Error> {
        let row: Option<models::SongRow> = sqlx::query_as(
            "
            select id, title, artist, duration_secs, thumbnail_url, source_url, created_at
            from songs
            where id = $1 and ingested
        ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn mark_ingested(&self, id: SongId) -> Result<(), sqlx::Error> {
        let result = sqlx::query("update songs set ingested = true where id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        match result.rows_affected() {
            0 => Err(sqlx::Error::RowNotFound),
            _ => Ok(()),
        }
    }
}
