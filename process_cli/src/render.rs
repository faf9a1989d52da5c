use std::path::Path;

use image::{ImageBuffer, Rgb, RgbImage};
use process::Spectrogram;

use crate::error::CliError;

/// Grayscale image of the spectrogram, time left to right and low
/// frequencies at the bottom.
pub fn to_image(spectrogram: &Spectrogram<f32>) -> RgbImage {
    let (lo, hi) = spectrogram
        .values()
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = if hi > lo { hi - lo } else { 1.0 };

    let mut canvas: RgbImage =
        ImageBuffer::new(spectrogram.bins() as u32, spectrogram.frames() as u32);
    canvas.rows_mut().enumerate().for_each(|(frame, row)| {
        row.zip(spectrogram.frame(frame)).for_each(|(pixel, value)| {
            *pixel = Rgb([((value - lo) / range * u8::MAX as f32) as u8; 3])
        })
    });

    image::imageops::rotate270(&canvas)
}

pub fn save(spectrogram: &Spectrogram<f32>, path: &Path) -> Result<(), CliError> {
    to_image(spectrogram).save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_runs_left_to_right_and_low_bins_sit_low() {
        // two frames of three bins
        let spectrogram = Spectrogram::from_frames(
            vec![vec![0.0, 0.0, 0.0], vec![4.0, 2.0, 0.0]],
            vec![0.0, 1.0, 2.0],
            vec![0.0, 0.5],
        );
        let image = to_image(&spectrogram);

        assert_eq!(image.dimensions(), (2, 3));
        assert_eq!(image.get_pixel(0, 2), &Rgb([0; 3]));
        assert_eq!(image.get_pixel(1, 2), &Rgb([255; 3]));
        assert_eq!(image.get_pixel(1, 1), &Rgb([127; 3]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([0; 3]));
    }
}
