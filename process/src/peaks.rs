use tracing::{debug, instrument};

use crate::{config::PeakConfig, spectrogram::Spectrogram, Float};

/// A salient point of the spectrogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Seconds from the start of the sample.
    pub time: f64,
    /// Hz.
    pub frequency: f64,
}

/// Finds cells that are the maximum of their neighborhood and louder than the
/// spectrogram's mean.
///
/// Peaks come out ordered by time, then frequency.
#[instrument(skip_all, fields(bins = spectrogram.bins(), frames = spectrogram.frames()), level = "trace")]
pub fn extract_peaks<T: Float>(spectrogram: &Spectrogram<T>, config: &PeakConfig) -> Vec<Peak> {
    let (bins, frames) = (spectrogram.bins(), spectrogram.frames());
    if bins == 0 || frames == 0 {
        return Vec::new();
    }

    let local_max = maximum_filter(
        spectrogram.values(),
        bins,
        frames,
        config.neighborhood.frequency,
        config.neighborhood.time,
    );
    let floor = amplitude_floor(spectrogram.values());

    // frame-major iteration yields time-then-frequency order directly
    let peaks: Vec<Peak> = spectrogram
        .values()
        .iter()
        .zip(local_max.iter())
        .enumerate()
        .filter(|(_, (value, max))| *value == *max && value.to_f64().is_some_and(|v| v > floor))
        .map(|(index, _)| Peak {
            time: spectrogram.times()[index / bins],
            frequency: spectrogram.frequencies()[index % bins],
        })
        .collect();

    debug!(peaks = peaks.len(), floor, "extracted peaks");
    peaks
}

/// Mean of all values, accumulated relative to the minimum so a constant
/// input returns exactly that constant.
fn amplitude_floor<T: Float>(values: &[T]) -> f64 {
    let values: Vec<f64> = values.iter().filter_map(|v| v.to_f64()).collect();
    if values.is_empty() {
        return f64::INFINITY;
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let excess: f64 = values.iter().map(|v| v - min).sum();
    min + excess / values.len() as f64
}

/// Two-dimensional moving maximum over a frame-major `bins × frames` matrix,
/// with mirrored edges.
fn maximum_filter<T: Float>(
    values: &[T],
    bins: usize,
    frames: usize,
    freq_window: usize,
    time_window: usize,
) -> Vec<T> {
    let mut along_freq = Vec::with_capacity(values.len());
    for frame in values.chunks(bins) {
        along_freq.extend(moving_max(frame, freq_window));
    }

    let mut out = vec![T::zero(); values.len()];
    let mut column = Vec::with_capacity(frames);
    for bin in 0..bins {
        column.clear();
        column.extend((0..frames).map(|frame| along_freq[frame * bins + bin]));
        for (frame, max) in moving_max(&column, time_window).into_iter().enumerate() {
            out[frame * bins + bin] = max;
        }
    }

    out
}

/// Maximum over the window `[i - size/2, i + (size-1)/2]` for every `i`.
fn moving_max<T: Float>(line: &[T], size: usize) -> Vec<T> {
    let before = (size / 2) as isize;
    let after = ((size.max(1) - 1) / 2) as isize;
    let len = line.len() as isize;

    (0..len)
        .map(|i| {
            (i - before..=i + after)
                .map(|j| line[reflect(j, len)])
                .fold(line[i as usize], |acc, v| if v > acc { v } else { acc })
        })
        .collect()
}

/// Maps an out-of-range index back inside `0..len` by mirroring about the
/// edges, repeating the edge sample (`d c b a | a b c d | d c b a`).
fn reflect(index: isize, len: isize) -> usize {
    let period = 2 * len;
    let folded = index.rem_euclid(period);
    let mirrored = if folded < len { folded } else { period - 1 - folded };
    mirrored as usize
}
