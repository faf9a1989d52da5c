use std::{
    collections::HashMap,
    sync::Arc,
};

use num_complex::Complex;
use parking_lot::{Mutex, RwLock};
use rustfft::FftPlanner;
use tracing::instrument;

use crate::{config::SpectrogramConfig, Error, Float, Result};

const LOG_EPSILON: f64 = 1e-10;

/// Magnitudes of a short-time Fourier transform.
///
/// Stored frame-major: all bins of frame 0, then all bins of frame 1, and so on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram<T> {
    values: Vec<T>,
    bins: usize,
    frequencies: Vec<f64>,
    times: Vec<f64>,
}

impl<T: Float> Spectrogram<T> {
    pub fn from_frames(frames: Vec<Vec<T>>, frequencies: Vec<f64>, times: Vec<f64>) -> Self {
        let bins = frequencies.len();
        debug_assert!(frames.iter().all(|frame| frame.len() == bins));
        debug_assert_eq!(frames.len(), times.len());

        Self {
            values: frames.into_iter().flatten().collect(),
            bins,
            frequencies,
            times,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn frames(&self) -> usize {
        self.times.len()
    }

    pub fn frame(&self, frame: usize) -> &[T] {
        &self.values[frame * self.bins..(frame + 1) * self.bins]
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Center frequency of each bin, in Hz.
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Start time of each frame, in seconds.
    pub fn times(&self) -> &[f64] {
        &self.times
    }
}

#[derive(Clone)]
pub struct SpectrogramGenerator<T: Float> {
    planner: Arc<Mutex<FftPlanner<T>>>,
    hanns: Arc<RwLock<HashMap<usize, Arc<Vec<T>>>>>,
}

impl<T: Float> Default for SpectrogramGenerator<T> {
    fn default() -> Self {
        Self {
            planner: Arc::new(Mutex::new(FftPlanner::new())),
            hanns: Default::default(),
        }
    }
}

impl<T: Float> SpectrogramGenerator<T> {
    #[instrument(skip(self, samples), fields(samples = samples.len()), level = "trace")]
    pub fn run(
        &self,
        samples: &[f32],
        sample_rate: u32,
        config: &SpectrogramConfig,
    ) -> Result<Spectrogram<T>> {
        let window_len = config.fft_len;
        if window_len == 0 || samples.len() < window_len {
            return Err(Error::InsufficientAudio {
                samples: samples.len(),
                window: window_len,
            });
        }

        // zero-padded to twice the window, only the lower half is kept
        let fft_len = window_len * 2;
        let fft = self.planner.lock().plan_fft_forward(fft_len);
        let hann = self.get_hann(window_len);
        let hop = config.hop();
        let epsilon = cast::<T>(LOG_EPSILON);

        let frames = samples
            .windows(window_len)
            .step_by(hop)
            .map(|window| {
                let mut buffer = window
                    .iter()
                    .zip(hann.iter())
                    .map(|(&sample, &hann)| Complex::new(cast::<T>(sample as f64) * hann, T::zero()))
                    .chain(std::iter::repeat(Complex::new(T::zero(), T::zero())))
                    .take(fft_len)
                    .collect::<Vec<_>>();
                fft.process(&mut buffer);
                buffer
            })
            .map(|complex| {
                complex
                    .into_iter()
                    .take(window_len)
                    .map(|val| val.norm())
                    .map(|magnitude| match config.log_compress {
                        true => (magnitude + epsilon).ln(),
                        false => magnitude,
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let rate = sample_rate as f64;
        let frequencies = (0..window_len)
            .map(|bin| bin as f64 * rate / fft_len as f64)
            .collect();
        let times = (0..frames.len())
            .map(|frame| (frame * hop) as f64 / rate)
            .collect();

        Ok(Spectrogram::from_frames(frames, frequencies, times))
    }

    fn get_hann(&self, size: usize) -> Arc<Vec<T>> {
        if let Some(hann) = self.hanns.read().get(&size) {
            return hann.clone();
        }

        self.generate_hann(size)
    }

    #[instrument(skip(self), level = "trace")]
    fn generate_hann(&self, size: usize) -> Arc<Vec<T>> {
        let hann = Arc::new(generate_hanning_window(size));
        self.hanns.write().insert(size, hann.clone());
        hann
    }
}

/// Symmetric Hann window, zero at both ends.
fn generate_hanning_window<T: Float>(size: usize) -> Vec<T> {
    if size == 1 {
        return vec![T::one()];
    }

    let span = (size - 1) as f64;
    (0..size)
        .map(|i| 0.5 * (1.0 - (std::f64::consts::TAU * i as f64 / span).cos()))
        .map(cast::<T>)
        .collect()
}

fn cast<T: Float>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::zero)
}
