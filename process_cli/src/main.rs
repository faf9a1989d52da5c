use clap::Parser;
use futures::{stream, StreamExt};
use process::{
    Config, Fingerprint, Fingerprinter, IngestOutcome, MatchOutcome, Matcher, NewSong, Sample,
};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{debug, error, info, instrument, warn};

mod audio;
mod error;
mod render;

use error::CliError;

/// Exit status of `discover` when nothing clears the score threshold.
const NO_MATCH: u8 = 1;
const FAILURE: u8 = 2;

#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct Cli {
    /// PostgreSQL connection url
    #[arg(long)]
    db: String,
    /// JSON file overriding fingerprinting and matching options
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Create the tables if they do not exist
    Setup,
    /// Fingerprint one file and add it to the library
    Upload {
        path: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(short, long)]
        artist: String,
        #[arg(long, default_value = "")]
        thumbnail_url: String,
        #[arg(long, default_value = "")]
        source_url: String,
        #[arg(long)]
        spectrogram_png: Option<PathBuf>,
    },
    /// Ingest every song listed in a JSON manifest
    Batch {
        manifest: PathBuf,
        /// Songs written to the database at once
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Identify a recording
    Discover {
        path: PathBuf,
        #[arg(short, long)]
        score_threshold: Option<u32>,
        /// Print every song above the threshold instead of the best match
        #[arg(long)]
        all: bool,
        #[arg(long)]
        spectrogram_png: Option<PathBuf>,
    },
    /// List ingested songs, newest first
    Library,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    path: PathBuf,
    title: String,
    artist: String,
    #[serde(default)]
    thumbnail_url: String,
    #[serde(default)]
    source_url: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    {
        use tracing_subscriber::prelude::*;

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .init()
    }

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(error) => {
            error!(%error, "command failed");
            eprintln!("error: {error}");
            ExitCode::from(FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = load_config(cli.config.as_deref())?;
    let database = database::Database::connect(&cli.db).await?;

    match cli.command {
        Command::Setup => {
            database.setup().await?;
            info!("schema ready");
        }
        Command::Upload {
            path,
            title,
            artist,
            thumbnail_url,
            source_url,
            spectrogram_png,
        } => {
            let start = std::time::Instant::now();
            let (sample, fingerprints) = fingerprint_file(path, config, spectrogram_png).await?;
            let elapsed = start.elapsed();
            info!(?elapsed, fingerprints = fingerprints.len(), "completed parse");

            let metadata = NewSong {
                title,
                artist,
                duration: sample.duration().round() as u32,
                thumbnail_url,
                source_url,
            };
            upload_song(&database, &metadata, &fingerprints).await?;
        }
        Command::Batch {
            manifest,
            concurrency,
        } => return batch_upload(&database, config, &manifest, concurrency).await,
        Command::Discover {
            path,
            score_threshold,
            all,
            spectrogram_png,
        } => {
            let mut config = config;
            if let Some(score_threshold) = score_threshold {
                config.score_threshold = score_threshold;
            }
            return discover_song(&database, config, path, all, spectrogram_png).await;
        }
        Command::Library => print_library(&database).await?,
    }

    Ok(ExitCode::SUCCESS)
}

fn load_config(path: Option<&Path>) -> Result<Config, CliError> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw).map_err(|source| CliError::Json {
                path: path.to_owned(),
                source,
            })?
        }
        None => Config::default(),
    };
    config.validate()?;
    debug!(?config, "loaded config");

    Ok(config)
}

/// Decodes and fingerprints a file off the async runtime.
#[instrument(skip(config), level = "trace")]
async fn fingerprint_file(
    path: PathBuf,
    config: Config,
    spectrogram_png: Option<PathBuf>,
) -> Result<(Sample, Vec<Fingerprint>), CliError> {
    tokio::task::spawn_blocking(move || {
        let fingerprinter = Fingerprinter::new(config)?;
        let sample = audio::load(&path, fingerprinter.config().sample_rate)?;

        if let Some(png) = spectrogram_png {
            render::save(&fingerprinter.spectrogram(&sample)?, &png)?;
            info!(path = %png.display(), "wrote spectrogram image");
        }

        let fingerprints = fingerprinter.fingerprint(&sample)?;
        Ok::<_, CliError>((sample, fingerprints))
    })
    .await?
}

async fn upload_song(
    database: &database::Database,
    metadata: &NewSong,
    fingerprints: &[Fingerprint],
) -> Result<(), CliError> {
    let start = std::time::Instant::now();
    let outcome = database.insert_new_song(metadata, fingerprints).await?;
    let elapsed = start.elapsed();

    match outcome {
        IngestOutcome::Inserted {
            song_id,
            fingerprints,
        } => {
            info!(?elapsed, %song_id, fingerprints, ?metadata, "inserted song");
            println!("{song_id}\t{} - {}", metadata.title, metadata.artist);
        }
        IngestOutcome::AlreadyPresent { song_id } => {
            warn!(%song_id, ?metadata, "song already in library, skipped");
            println!("{song_id}\t{} - {} (already present)", metadata.title, metadata.artist);
        }
    }

    Ok(())
}

#[instrument(skip(database, config), level = "debug")]
async fn batch_upload(
    database: &database::Database,
    config: Config,
    manifest: &Path,
    concurrency: usize,
) -> Result<ExitCode, CliError> {
    let raw = tokio::fs::read_to_string(manifest).await?;
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&raw).map_err(|source| CliError::Json {
            path: manifest.to_owned(),
            source,
        })?;
    info!(songs = entries.len(), "read manifest");

    let sample_rate = config.sample_rate;
    let samples: Vec<(ManifestEntry, Result<Sample, CliError>)> = stream::iter(entries)
        .map(|entry| async move {
            let path = entry.path.clone();
            let sample = tokio::task::spawn_blocking(move || audio::load(&path, sample_rate)).await;
            (entry, sample.map_err(CliError::from).and_then(|s| s))
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut failed = 0usize;
    let mut songs: Vec<(ManifestEntry, Sample)> = Vec::new();
    for (entry, sample) in samples {
        match sample {
            Ok(sample) => songs.push((entry, sample)),
            Err(error) => {
                error!(path = %entry.path.display(), %error, "failed to decode");
                failed += 1;
            }
        }
    }

    let start = std::time::Instant::now();
    let batch: Vec<Sample> = songs.iter().map(|(_, sample)| sample.clone()).collect();
    let fingerprints = tokio::task::spawn_blocking(move || {
        Fingerprinter::new(config).map(|fingerprinter| fingerprinter.fingerprint_many(&batch))
    })
    .await??;
    let elapsed = start.elapsed();
    info!(?elapsed, songs = songs.len(), "fingerprinted batch");

    let results: Vec<Result<(), CliError>> = stream::iter(songs.into_iter().zip(fingerprints))
        .map(|((entry, sample), fingerprints)| async move {
            let fingerprints = fingerprints.map_err(|error| {
                error!(path = %entry.path.display(), %error, "failed to fingerprint");
                CliError::from(error)
            })?;
            let metadata = NewSong {
                title: entry.title,
                artist: entry.artist,
                duration: sample.duration().round() as u32,
                thumbnail_url: entry.thumbnail_url,
                source_url: entry.source_url,
            };
            upload_song(database, &metadata, &fingerprints)
                .await
                .inspect_err(|error| error!(title = %metadata.title, %error, "failed to ingest"))
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    failed += results.iter().filter(|result| result.is_err()).count();
    if failed > 0 {
        warn!(failed, "some songs were not ingested");
        return Ok(ExitCode::from(FAILURE));
    }

    Ok(ExitCode::SUCCESS)
}

async fn discover_song(
    database: &database::Database,
    config: Config,
    path: PathBuf,
    all: bool,
    spectrogram_png: Option<PathBuf>,
) -> Result<ExitCode, CliError> {
    let matching = config.matching();
    let (_, query) = fingerprint_file(path, config, spectrogram_png).await?;
    debug!(fingerprints = query.len(), "querying database");

    let matcher = Matcher::new(database, database, matching);

    if all {
        let found = matcher.identify_all(&query).await?;
        for found in &found {
            println!(
                "{}\t{} - {}\tscore {}\toffset {:.1}s",
                found.song.id, found.song.title, found.song.artist, found.score, found.offset
            );
        }
        return Ok(match found.is_empty() {
            true => ExitCode::from(NO_MATCH),
            false => ExitCode::SUCCESS,
        });
    }

    match matcher.identify(&query).await? {
        MatchOutcome::Found(found) => {
            println!(
                "{} - {} (id {}, score {}, offset {:.1}s)",
                found.song.title, found.song.artist, found.song.id, found.score, found.offset
            );
            if !found.song.source_url.is_empty() {
                println!("{}", found.song.source_url);
            }
            Ok(ExitCode::SUCCESS)
        }
        MatchOutcome::NoMatch => {
            println!("no match");
            Ok(ExitCode::from(NO_MATCH))
        }
    }
}

async fn print_library(database: &database::Database) -> Result<(), CliError> {
    let format = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]");

    let entries = database.library().await?;
    for entry in &entries {
        println!(
            "{}\t{}\t{} - {}\t{}s",
            entry.song.id,
            entry.created_at.format(format)?,
            entry.song.title,
            entry.song.artist,
            entry.song.duration
        );
    }
    debug!(songs = entries.len(), "listed library");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn discover_flags() {
        let cli = Cli::parse_from([
            "process_cli",
            "--db",
            "postgres://localhost/songs",
            "discover",
            "clip.mp3",
            "--score-threshold",
            "4",
        ]);
        let Command::Discover {
            path,
            score_threshold,
            all,
            ..
        } = cli.command
        else {
            panic!("expected discover");
        };
        assert_eq!(path, PathBuf::from("clip.mp3"));
        assert_eq!(score_threshold, Some(4));
        assert!(!all);
    }

    #[test]
    fn manifest_urls_are_optional() {
        let entries: Vec<ManifestEntry> = serde_json::from_str(
            r#"[{"path": "a.mp3", "title": "A", "artist": "X"},
                {"path": "b.flac", "title": "B", "artist": "Y", "source_url": "https://video.example/b"}]"#,
        )
        .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].thumbnail_url, "");
        assert_eq!(entries[1].source_url, "https://video.example/b");
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), Config::default());
    }

    #[test]
    fn invalid_config_file_is_rejected() {
        let path = std::env::temp_dir().join(format!("process_cli_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"overlap_ratio": 1.5}"#).unwrap();
        let result = load_config(Some(&path));
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            result,
            Err(CliError::Process(process::Error::InvalidConfig(_)))
        ));
    }
}
