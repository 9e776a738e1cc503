use std::{path::Path, sync::Arc};

use rubato::{FftFixedInOut, Resampler};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::{HapticError, Result};

const RESAMPLE_CHUNK: usize = 1024;

/// Immutable mono sample buffer together with its sample rate.
///
/// Cloning is cheap: the samples live behind an [`Arc`] so derived tracks
/// (harmonic/percussive components) and the original can be passed around
/// freely for the duration of one pipeline run.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioTrack {
    /// Wraps decoded mono samples. Fails on an empty buffer or a zero rate.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(HapticError::Decode("sample rate must be positive".into()));
        }
        if samples.is_empty() {
            return Err(HapticError::EmptyAudio);
        }

        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
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

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Decodes the first audio track of `path`, mixes it down to mono and
/// resamples it to `target_sample_rate`.
pub fn decode_file(path: &Path, target_sample_rate: u32) -> Result<AudioTrack> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| match err {
            // The probe hit the end of the file without recognising a container.
            SymphoniaError::IoError(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                HapticError::UnsupportedFormat(format!("{}: no known container", path.display()))
            }
            other => map_symphonia_error(other),
        })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| HapticError::UnsupportedFormat("no audio track found".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| HapticError::Decode("stream does not declare a sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(map_symphonia_error)?;

    let mut mono: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(map_symphonia_error(err)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                tracing::warn!(reason, "skipping corrupt packet");
                continue;
            }
            Err(err) => return Err(map_symphonia_error(err)),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        mono.extend(
            buffer
                .samples()
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        );
    }

    if mono.is_empty() {
        return Err(HapticError::EmptyAudio);
    }

    tracing::debug!(
        ?path,
        source_rate,
        frames = mono.len(),
        "decoded audio stream"
    );

    let samples = if source_rate == target_sample_rate {
        mono
    } else {
        resample(&mono, source_rate, target_sample_rate)?
    };

    AudioTrack::new(samples, target_sample_rate)
}

/// Resamples a mono buffer, compensating for the resampler's delay so the
/// output starts at the same instant as the input.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, RESAMPLE_CHUNK, 1)
            .map_err(|e| HapticError::Decode(e.to_string()))?;

    let chunk = resampler.input_frames_next();
    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * u64::from(target_rate) / u64::from(source_rate)) as usize;

    let mut output = Vec::with_capacity(expected + delay + chunk);
    let mut pos = 0;
    while output.len() < expected + delay {
        let mut block = vec![0.0_f32; chunk];
        if pos < samples.len() {
            let end = (pos + chunk).min(samples.len());
            block[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += chunk;

        let resampled = resampler
            .process(&[block], None)
            .map_err(|e| HapticError::Decode(e.to_string()))?;
        output.extend_from_slice(&resampled[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

fn map_symphonia_error(err: SymphoniaError) -> HapticError {
    match err {
        SymphoniaError::Unsupported(what) => HapticError::UnsupportedFormat(what.to_string()),
        SymphoniaError::IoError(io) => HapticError::Io(io),
        other => HapticError::Decode(other.to_string()),
    }
}
