use std::{fs::File, io::ErrorKind, path::Path};

use process::Sample;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::{
    audio::{AudioBuffer, Signal},
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::CliError;

const RESAMPLE_CHUNK: usize = 1024;

/// Decodes an audio file into a mono clip at `sample_rate`.
#[instrument(level = "trace")]
pub fn load(path: &Path, sample_rate: u32) -> Result<Sample, CliError> {
    let (channels, source_rate) = decode(path)?;
    let sample = Sample::from_channels(&channels, source_rate);
    debug!(
        channels = channels.len(),
        source_rate,
        seconds = sample.duration(),
        "decoded file"
    );

    resample(sample, sample_rate)
}

fn decode_error(error: SymphoniaError) -> CliError {
    process::Error::Decode(error.to_string()).into()
}

/// Every channel of the default track, plus its sample rate.
fn decode(path: &Path) -> Result<(Vec<Vec<f32>>, u32), CliError> {
    debug!("opening file");
    let file = File::open(path)?;
    let stream = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(decode_error)?;

    let metadata = probed.metadata.get();
    trace!(?metadata, "read metadata");

    let format = &mut probed.format;
    let tracks = format.tracks();
    if tracks.len() != 1 {
        warn!(tracks = tracks.len(), "file has multiple tracks, using only default");
    }
    let track = format
        .default_track()
        .ok_or_else(|| process::Error::Decode("no default track".into()))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| process::Error::Decode("track has no sample rate".into()))?;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(decode_error)?;
    info!(params = ?track.codec_params, "read codec params");
    let track_id = track.id;

    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(decode_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                warn!(reason, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(decode_error(e)),
        };

        let mut converted: AudioBuffer<f32> =
            AudioBuffer::new(decoded.frames() as u64, decoded.spec().to_owned());
        decoded.convert(&mut converted);
        let planes = converted.planes();
        let planes_slice = planes.planes();
        if channels.len() != planes_slice.len() {
            trace!("resizing channels due to size mismatch");
            channels.resize_with(planes_slice.len(), Vec::new);
        }
        channels
            .iter_mut()
            .zip(planes_slice)
            .for_each(|(d, v)| d.extend(*v));
    }

    if channels.iter().all(Vec::is_empty) {
        return Err(process::Error::Decode("no audio frames decoded".into()).into());
    }

    Ok((channels, sample_rate))
}

/// Converts `sample` to `target_rate`, compensating the resampler delay so
/// sample times are preserved.
pub fn resample(sample: Sample, target_rate: u32) -> Result<Sample, CliError> {
    if sample.sample_rate() == target_rate || sample.is_empty() {
        return Ok(Sample::new(sample.samples().to_vec(), target_rate));
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = target_rate as f64 / sample.sample_rate() as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)?;

    let input = sample.samples();
    let mut output: Vec<f32> = Vec::with_capacity((input.len() as f64 * ratio) as usize);

    for chunk in input.chunks(RESAMPLE_CHUNK) {
        let frames = if chunk.len() == RESAMPLE_CHUNK {
            resampler.process(&[chunk], None)?
        } else {
            resampler.process_partial(Some(&[chunk]), None)?
        };
        output.extend_from_slice(&frames[0]);
    }
    let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
    output.extend_from_slice(&tail[0]);

    let delay = resampler.output_delay();
    let expected = (input.len() as f64 * ratio).round() as usize;
    let samples: Vec<f32> = output.into_iter().skip(delay).take(expected).collect();

    Ok(Sample::new(samples, target_rate))
}
