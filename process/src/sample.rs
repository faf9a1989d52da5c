/// Mono PCM audio, amplitudes in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Sample {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Mixes every channel down to mono and scales the result so its loudest
    /// sample sits at full scale.
    pub fn from_channels(channels: &[Vec<f32>], sample_rate: u32) -> Self {
        let len = channels.iter().map(Vec::len).min().unwrap_or(0);
        let count = channels.len().max(1) as f32;

        let mut mono: Vec<f32> = (0..len)
            .map(|i| channels.iter().map(|channel| channel[i]).sum::<f32>() / count)
            .collect();

        let loudest = mono.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        // silence stays silent
        if loudest > 0.0 {
            mono.iter_mut().for_each(|s| *s /= loudest);
        }

        Self::new(mono, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples `[start, end)`, clamped to the clip.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.samples.len());
        let start = start.min(end);
        Self::new(self.samples[start..end].to_vec(), self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixes_down_and_normalizes() {
        let left = vec![0.5, -0.25, 0.0];
        let right = vec![0.5, -0.25, 0.25];

        let sample = Sample::from_channels(&[left, right], 8_000);

        assert_eq!(sample.sample_rate(), 8_000);
        assert_eq!(sample.samples(), &[1.0, -0.5, 0.25]);
    }

    #[test]
    fn silent_input_is_not_divided_by_zero() {
        let sample = Sample::from_channels(&[vec![0.0; 4]], 8_000);
        assert_eq!(sample.samples(), &[0.0; 4]);
    }

    #[test]
    fn ragged_channels_use_shortest() {
        let sample = Sample::from_channels(&[vec![1.0, 1.0, 1.0], vec![1.0]], 8_000);
        assert_eq!(sample.len(), 1);
    }

    #[test]
    fn duration_and_slice() {
        let sample = Sample::new(vec![0.0; 16_000], 8_000);
        assert_eq!(sample.duration(), 2.0);

        let sliced = sample.slice(4_000, 100_000);
        assert_eq!(sliced.len(), 12_000);
        assert_eq!(sliced.sample_rate(), 8_000);
    }
}
