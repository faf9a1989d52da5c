use rayon::prelude::*;
use rustfft::FftNum;
use tracing::{debug, instrument};

pub mod config;
pub mod error;
pub mod hashing;
pub mod index;
pub mod ingest;
pub mod matcher;
pub mod peaks;
pub mod sample;
pub mod spectrogram;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use hashing::{Fingerprint, FingerprintHash};
pub use index::{FingerprintIndex, IndexEntry, NewSong, Song, SongCatalog, SongId};
pub use ingest::{ingest, IngestOutcome};
pub use matcher::{Identification, MatchCandidate, MatchOutcome, Matcher};
pub use peaks::Peak;
pub use sample::Sample;
pub use spectrogram::{Spectrogram, SpectrogramGenerator};
pub use store::MemoryStore;

pub trait Float: FftNum + num_traits::Float {}
impl Float for f32 {}
impl Float for f64 {}

/// Turns samples into fingerprints: spectrogram, peaks, then hashes.
#[derive(Clone)]
pub struct Fingerprinter {
    generator: SpectrogramGenerator<f32>,
    config: Config,
}

impl Fingerprinter {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            generator: SpectrogramGenerator::default(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn spectrogram(&self, sample: &Sample) -> Result<Spectrogram<f32>> {
        if sample.sample_rate() != self.config.sample_rate {
            return Err(Error::SampleRateMismatch {
                expected: self.config.sample_rate,
                actual: sample.sample_rate(),
            });
        }

        self.generator.run(
            sample.samples(),
            sample.sample_rate(),
            &self.config.spectrogram(),
        )
    }

    pub fn peaks(&self, sample: &Sample) -> Result<Vec<Peak>> {
        let spectrogram = self.spectrogram(sample)?;
        Ok(peaks::extract_peaks(&spectrogram, &self.config.peaks()))
    }

    #[instrument(skip_all, fields(seconds = sample.duration()), level = "trace")]
    pub fn fingerprint(&self, sample: &Sample) -> Result<Vec<Fingerprint>> {
        let peaks = self.peaks(sample)?;
        let fingerprints = hashing::generate_fingerprints(&peaks, &self.config.hashing());
        debug!(peaks = peaks.len(), fingerprints = fingerprints.len(), "fingerprinted sample");
        Ok(fingerprints)
    }

    /// Fingerprints every sample on the rayon pool. Results keep input order.
    ///
    /// Each worker plans its own transforms, nothing mutable is shared.
    pub fn fingerprint_many(&self, samples: &[Sample]) -> Vec<Result<Vec<Fingerprint>>> {
        let config = &self.config;
        samples
            .par_iter()
            .map_init(
                || Fingerprinter {
                    generator: SpectrogramGenerator::default(),
                    config: config.clone(),
                },
                |fingerprinter, sample| fingerprinter.fingerprint(sample),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord(seconds: f64, sample_rate: u32) -> Sample {
        let len = (seconds * sample_rate as f64) as usize;
        let samples = (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                let wobble = (std::f64::consts::TAU * 0.7 * t).sin();
                (0.4 * (std::f64::consts::TAU * 440.0 * t).sin()
                    + 0.3 * (std::f64::consts::TAU * (1320.0 + 200.0 * wobble) * t).sin()) as f32
            })
            .collect();
        Sample::new(samples, sample_rate)
    }

    #[test]
    fn rejects_invalid_config() {
        let config = Config {
            fan_out: 0,
            ..Default::default()
        };
        assert!(matches!(Fingerprinter::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_foreign_sample_rate() {
        let fingerprinter = Fingerprinter::new(Config::default()).unwrap();
        let result = fingerprinter.fingerprint(&Sample::new(vec![0.0; 4096], 44_100));

        assert!(matches!(
            result,
            Err(Error::SampleRateMismatch {
                expected: 11_025,
                actual: 44_100
            })
        ));
    }

    #[test]
    fn too_short_is_insufficient_audio() {
        let fingerprinter = Fingerprinter::new(Config::default()).unwrap();
        let result = fingerprinter.fingerprint(&Sample::new(vec![0.1; 1000], 11_025));
        assert!(matches!(result, Err(Error::InsufficientAudio { .. })));
    }

    #[test]
    fn silence_has_no_fingerprints() {
        let fingerprinter = Fingerprinter::new(Config::default()).unwrap();
        let silence = Sample::new(vec![0.0; 11_025 * 3], 11_025);

        assert!(fingerprinter.peaks(&silence).unwrap().is_empty());
        assert!(fingerprinter.fingerprint(&silence).unwrap().is_empty());
    }

    #[test]
    fn fingerprints_are_deterministic() {
        let fingerprinter = Fingerprinter::new(Config::default()).unwrap();
        let sample = chord(4.0, 11_025);

        let first = fingerprinter.fingerprint(&sample).unwrap();
        let second = fingerprinter.fingerprint(&sample).unwrap();
        let fresh = Fingerprinter::new(Config::default())
            .unwrap()
            .fingerprint(&sample)
            .unwrap();

        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert_eq!(first, fresh);
    }

    #[test]
    fn parallel_batch_matches_sequential() {
        let fingerprinter = Fingerprinter::new(Config::default()).unwrap();
        let samples = vec![
            chord(2.0, 11_025),
            Sample::new(vec![0.0; 10], 11_025),
            chord(3.0, 11_025),
        ];

        let batch = fingerprinter.fingerprint_many(&samples);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].as_ref().unwrap(), &fingerprinter.fingerprint(&samples[0]).unwrap());
        assert!(matches!(batch[1], Err(Error::InsufficientAudio { .. })));
        assert_eq!(batch[2].as_ref().unwrap(), &fingerprinter.fingerprint(&samples[2]).unwrap());
    }
}
