use process::{Song, SongId};
use time::OffsetDateTime;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SongRow {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub duration_secs: i32,
    pub thumbnail_url: String,
    pub source_url: String,
    pub created_at: OffsetDateTime,
}

impl From<SongRow> for Song {
    fn from(row: SongRow) -> Self {
        Song {
            id: SongId(row.id),
            title: row.title,
            artist: row.artist,
            duration: row.duration_secs.max(0) as u32,
            thumbnail_url: row.thumbnail_url,
            source_url: row.source_url,
        }
    }
}

/// A song in the library listing.
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub song: Song,
    pub created_at: OffsetDateTime,
}

impl From<SongRow> for LibraryEntry {
    fn from(row: SongRow) -> Self {
        let created_at = row.created_at;
        LibraryEntry {
            song: row.into(),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> SongRow {
        SongRow {
            id: 12,
            title: "Title".into(),
            artist: "Artist".into(),
            duration_secs: 215,
            thumbnail_url: "https://img.example/12.jpg".into(),
            source_url: "https://video.example/12".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn row_into_song() {
        let song: Song = row().into();
        assert_eq!(song.id, SongId(12));
        assert_eq!(song.duration, 215);
        assert_eq!(song.source_url, "https://video.example/12");
    }

    #[test]
    fn negative_duration_clamps() {
        let song: Song = SongRow {
            duration_secs: -3,
            ..row()
        }
        .into();
        assert_eq!(song.duration, 0);
    }

    #[test]
    fn library_entry_keeps_timestamp() {
        let entry: LibraryEntry = row().into();
        assert_eq!(entry.created_at, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(entry.song.title, "Title");
    }
}
