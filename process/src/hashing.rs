use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::{config::HashConfig, peaks::Peak};

/// Leading byte of every canonical triple. Bumped whenever quantization or
/// layout changes.
pub const HASH_FORMAT_VERSION: u8 = 1;

/// SHA-256 digest of a canonical `(f1, f2, Δt)` triple.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FingerprintHash(pub [u8; 32]);

impl FingerprintHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for FingerprintHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FingerprintHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FingerprintHash({})", self.to_hex())
    }
}

impl TryFrom<&[u8]> for FingerprintHash {
    type Error = std::array::TryFromSliceError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Self(bytes.try_into()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: FingerprintHash,
    /// Time of the anchor peak, in seconds.
    pub anchor_time: f64,
}

/// Quantized anchor/target pair: whole Hz and hundredths of a second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triple {
    pub anchor_frequency: u32,
    pub target_frequency: u32,
    pub delta_centis: u32,
}

impl Triple {
    pub fn quantize(anchor: &Peak, target: &Peak) -> Self {
        Self {
            anchor_frequency: anchor.frequency.round() as u32,
            target_frequency: target.frequency.round() as u32,
            delta_centis: ((target.time - anchor.time) * 100.0).round() as u32,
        }
    }

    /// Version byte followed by the three fields, big endian.
    pub fn canonical_bytes(&self) -> [u8; 13] {
        let mut out = [0u8; 13];
        out[0] = HASH_FORMAT_VERSION;
        out[1..5].copy_from_slice(&self.anchor_frequency.to_be_bytes());
        out[5..9].copy_from_slice(&self.target_frequency.to_be_bytes());
        out[9..13].copy_from_slice(&self.delta_centis.to_be_bytes());
        out
    }

    pub fn hash(&self) -> FingerprintHash {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        FingerprintHash(hasher.finalize().into())
    }
}

/// Pairs each anchor with the next `fan_out` peaks and hashes every pair whose
/// time difference lies within `[min_delta, max_delta]`.
///
/// `peaks` must be ordered by time, then frequency.
#[instrument(skip_all, fields(peaks = peaks.len()), level = "trace")]
pub fn generate_fingerprints(peaks: &[Peak], config: &HashConfig) -> Vec<Fingerprint> {
    let mut fingerprints = Vec::new();

    for (i, anchor) in peaks.iter().enumerate() {
        for target in peaks.iter().skip(i + 1).take(config.fan_out) {
            let delta = target.time - anchor.time;
            if delta < config.min_delta || delta > config.max_delta {
                continue;
            }

            fingerprints.push(Fingerprint {
                hash: Triple::quantize(anchor, target).hash(),
                anchor_time: anchor.time,
            });
        }
    }

    debug!(fingerprints = fingerprints.len(), "generated fingerprints");
    fingerprints
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(time: f64, frequency: f64) -> Peak {
        Peak { time, frequency }
    }

    fn config(fan_out: usize, min_delta: f64, max_delta: f64) -> HashConfig {
        HashConfig {
            fan_out,
            min_delta,
            max_delta,
        }
    }

    #[test]
    fn canonical_layout() {
        let triple = Triple {
            anchor_frequency: 440,
            target_frequency: 1_000,
            delta_centis: 125,
        };
        assert_eq!(
            triple.canonical_bytes(),
            [1, 0, 0, 1, 184, 0, 0, 3, 232, 0, 0, 0, 125]
        );
    }

    #[test]
    fn quantization_absorbs_jitter() {
        let a = Triple::quantize(&peak(1.0, 440.2), &peak(1.502, 880.4));
        let b = Triple::quantize(&peak(2.0, 439.8), &peak(2.498, 879.6));

        assert_eq!(a, b);
        assert_eq!(a.delta_centis, 50);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn distinct_triples_hash_differently() {
        let base = Triple::quantize(&peak(0.0, 440.0), &peak(0.5, 880.0));
        let swapped = Triple::quantize(&peak(0.0, 880.0), &peak(0.5, 440.0));
        let later = Triple::quantize(&peak(0.0, 440.0), &peak(0.51, 880.0));

        assert_ne!(base.hash(), swapped.hash());
        assert_ne!(base.hash(), later.hash());
    }

    #[test]
    fn hex_round_trips_through_bytes() {
        let hash = Triple::quantize(&peak(0.0, 1.0), &peak(1.0, 2.0)).hash();
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);

        let decoded = hex::decode(&hex).unwrap();
        assert_eq!(FingerprintHash::try_from(decoded.as_slice()).unwrap(), hash);
        assert!(FingerprintHash::try_from(&decoded[..31]).is_err());
    }

    #[test]
    fn fan_out_limits_targets() {
        let peaks: Vec<Peak> = (0..6).map(|i| peak(i as f64, 100.0 * i as f64)).collect();
        let fingerprints = generate_fingerprints(&peaks, &config(2, 0.0, 10.0));

        // 2 + 2 + 2 + 2 + 1 + 0
        assert_eq!(fingerprints.len(), 9);
        let anchors: Vec<f64> = fingerprints.iter().map(|f| f.anchor_time).collect();
        assert_eq!(anchors, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0]);
    }

    #[test]
    fn delta_window_is_inclusive() {
        let peaks = vec![peak(0.0, 100.0), peak(0.5, 200.0), peak(1.0, 300.0), peak(3.0, 400.0)];
        let fingerprints = generate_fingerprints(&peaks, &config(10, 0.5, 1.0));

        let expected = vec![
            Triple::quantize(&peaks[0], &peaks[1]).hash(),
            Triple::quantize(&peaks[0], &peaks[2]).hash(),
            Triple::quantize(&peaks[1], &peaks[2]).hash(),
        ];
        let hashes: Vec<FingerprintHash> = fingerprints.iter().map(|f| f.hash).collect();
        assert_eq!(hashes, expected);
    }

    #[test]
    fn simultaneous_peaks_pair_at_zero_delta() {
        let peaks = vec![peak(2.0, 100.0), peak(2.0, 300.0)];
        let fingerprints = generate_fingerprints(&peaks, &config(15, 0.0, 10.0));

        assert_eq!(fingerprints.len(), 1);
        assert_eq!(fingerprints[0].anchor_time, 2.0);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let peaks: Vec<Peak> = (0..40)
            .map(|i| peak(i as f64 * 0.093, 150.0 + (i * 37 % 23) as f64 * 41.3))
            .collect();
        let first = generate_fingerprints(&peaks, &HashConfig::default());
        let second = generate_fingerprints(&peaks, &HashConfig::default());
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn no_peaks_no_fingerprints() {
        assert!(generate_fingerprints(&[], &HashConfig::default()).is_empty());
    }
}
