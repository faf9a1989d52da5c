use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Size of the centered neighborhood used by the peak maximum filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighborhood {
    /// Extent along the frequency axis, in bins.
    pub frequency: usize,
    /// Extent along the time axis, in frames.
    pub time: usize,
}

impl Default for Neighborhood {
    fn default() -> Self {
        Self {
            frequency: 20,
            time: 20,
        }
    }
}

/// Every tunable of the fingerprinting and matching pipeline.
///
/// Missing fields fall back to their defaults when deserialized, so a config
/// file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rate every sample is resampled to before analysis.
    pub sample_rate: u32,
    pub fft_window_size: usize,
    /// Fraction of a window shared with the next one, in `[0, 1)`.
    pub overlap_ratio: f64,
    /// Apply `ln(magnitude + ε)` to the spectrogram.
    pub log_compress: bool,
    pub fan_out: usize,
    /// Smallest anchor/target time difference that is hashed, in seconds.
    pub min_delta: f64,
    /// Largest anchor/target time difference that is hashed, in seconds.
    pub max_delta: f64,
    pub peak_neighborhood_size: Neighborhood,
    /// Minimum histogram peak a candidate needs to be reported.
    pub score_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 11_025,
            fft_window_size: 1024,
            overlap_ratio: 0.5,
            log_compress: true,
            fan_out: 15,
            min_delta: 0.0,
            max_delta: 10.0,
            peak_neighborhood_size: Neighborhood::default(),
            score_threshold: 10,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample_rate must be positive".into()));
        }
        if self.fft_window_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "fft_window_size must be at least 2, got {}",
                self.fft_window_size
            )));
        }
        if !(0.0..1.0).contains(&self.overlap_ratio) {
            return Err(Error::InvalidConfig(format!(
                "overlap_ratio must be in [0, 1), got {}",
                self.overlap_ratio
            )));
        }
        if self.fan_out == 0 {
            return Err(Error::InvalidConfig("fan_out must be positive".into()));
        }
        if !(self.min_delta >= 0.0 && self.min_delta <= self.max_delta) {
            return Err(Error::InvalidConfig(format!(
                "expected 0 <= min_delta <= max_delta, got {} and {}",
                self.min_delta, self.max_delta
            )));
        }
        let hood = self.peak_neighborhood_size;
        if hood.frequency == 0 || hood.time == 0 {
            return Err(Error::InvalidConfig(format!(
                "peak_neighborhood_size must be non-zero, got {}x{}",
                hood.frequency, hood.time
            )));
        }

        Ok(())
    }

    pub fn spectrogram(&self) -> SpectrogramConfig {
        SpectrogramConfig {
            fft_len: self.fft_window_size,
            overlap_ratio: self.overlap_ratio,
            log_compress: self.log_compress,
        }
    }

    pub fn peaks(&self) -> PeakConfig {
        PeakConfig {
            neighborhood: self.peak_neighborhood_size,
        }
    }

    pub fn hashing(&self) -> HashConfig {
        HashConfig {
            fan_out: self.fan_out,
            min_delta: self.min_delta,
            max_delta: self.max_delta,
        }
    }

    pub fn matching(&self) -> MatchConfig {
        MatchConfig {
            score_threshold: self.score_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrogramConfig {
    pub fft_len: usize,
    pub overlap_ratio: f64,
    pub log_compress: bool,
}

impl SpectrogramConfig {
    /// Distance between consecutive window starts, in samples.
    pub fn hop(&self) -> usize {
        ((self.fft_len as f64 * (1.0 - self.overlap_ratio)).round() as usize).max(1)
    }
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Config::default().spectrogram()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeakConfig {
    pub neighborhood: Neighborhood,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HashConfig {
    pub fan_out: usize,
    pub min_delta: f64,
    pub max_delta: f64,
}

impl Default for HashConfig {
    fn default() -> Self {
        Config::default().hashing()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    pub score_threshold: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Config::default().matching()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "fan_out": 5, "peak_neighborhood_size": { "frequency": 10, "time": 4 } }"#)
                .unwrap();

        assert_eq!(config.fan_out, 5);
        assert_eq!(config.peak_neighborhood_size, Neighborhood { frequency: 10, time: 4 });
        assert_eq!(config.fft_window_size, 1024);
        assert_eq!(config.score_threshold, 10);
    }

    #[test]
    fn rejects_full_overlap() {
        let config = Config {
            overlap_ratio: 1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_inverted_delta_window() {
        let config = Config {
            min_delta: 2.0,
            max_delta: 1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn hop_follows_overlap() {
        let spectrogram = Config::default().spectrogram();
        assert_eq!(spectrogram.hop(), 512);

        let no_overlap = SpectrogramConfig {
            overlap_ratio: 0.0,
            ..spectrogram
        };
        assert_eq!(no_overlap.hop(), 1024);

        let tiny = SpectrogramConfig {
            fft_len: 2,
            overlap_ratio: 0.9,
            log_compress: false,
        };
        assert_eq!(tiny.hop(), 1);
    }
}
