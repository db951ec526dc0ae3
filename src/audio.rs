//! A noise gate for 16-bit PCM WAV uploads.
//!
//! Frames whose energy sits near the recording's noise floor are attenuated
//! before the audio goes to the transcription service. Anything that isn't
//! 16-bit integer PCM WAV is left alone.

use hound::{SampleFormat, WavReader, WavWriter};
use std::{io::BufWriter, path::Path};
use tempfile::NamedTempFile;

const FRAME_MILLIS: u32 = 20;
/// Percentile of frame RMS taken as the noise floor.
const NOISE_FLOOR_PERCENTILE: usize = 10;
/// Frames below `floor * THRESHOLD_RATIO` are gated.
const THRESHOLD_RATIO: f64 = 1.5;
const GATE_GAIN: f64 = 0.1;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid WAV data: {0}")]
    Wav(#[from] hound::Error),
}

/// Gates the WAV file at `input` into a new temp file in `dir`.
///
/// Returns `Ok(None)` when `input` isn't a 16-bit PCM WAV.
///
/// # Errors
/// Sample decoding failures and temp file I/O.
pub fn clean_wav(input: &Path, dir: &Path) -> Result<Option<NamedTempFile>, AudioError> {
    let mut reader = match WavReader::open(input) {
        Ok(reader) => reader,
        Err(e) => {
            tracing::debug!("not a WAV file, skipping noise reduction: {}", e);
            return Ok(None);
        }
    };

    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        tracing::debug!(
            bits = spec.bits_per_sample,
            "unsupported WAV sample format, skipping noise reduction"
        );
        return Ok(None);
    }

    let mut samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    let gated = reduce_noise(&mut samples, spec.channels, spec.sample_rate);
    tracing::debug!(samples = samples.len(), gated_frames = gated, "noise gate applied");

    let output = tempfile::Builder::new()
        .prefix("cleaned-")
        .suffix(".wav")
        .tempfile_in(dir)?;
    let mut writer = WavWriter::new(BufWriter::new(output.as_file()), spec)?;
    for sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(Some(output))
}

/// Attenuates quiet frames of interleaved `samples` in place and returns
/// how many frames were gated.
///
/// Nothing is gated when the loud end of the recording (90th percentile)
/// is no louder than the threshold, i.e. there's nothing to separate.
pub fn reduce_noise(samples: &mut [i16], channels: u16, sample_rate: u32) -> usize {
    let Some(frame_len) = frame_len(channels, sample_rate).filter(|len| *len <= samples.len())
    else {
        return 0;
    };

    let levels: Vec<f64> = samples.chunks(frame_len).map(rms).collect();
    let mut sorted = levels.clone();
    sorted.sort_by(f64::total_cmp);

    let floor = sorted[sorted.len() * NOISE_FLOOR_PERCENTILE / 100];
    let threshold = floor * THRESHOLD_RATIO;
    let loud = sorted[(sorted.len() * 9 / 10).min(sorted.len() - 1)];
    if loud <= threshold {
        return 0;
    }

    let mut gated = 0;
    for (frame, level) in samples.chunks_mut(frame_len).zip(levels) {
        if level < threshold {
            for sample in frame.iter_mut() {
                *sample = (f64::from(*sample) * GATE_GAIN).round() as i16;
            }
            gated += 1;
        }
    }
    gated
}

/// Interleaved samples per frame; `None` when the header's rate and channel
/// count don't describe a usable frame.
fn frame_len(channels: u16, sample_rate: u32) -> Option<usize> {
    let per_channel = u64::from(sample_rate) * u64::from(FRAME_MILLIS) / 1000;
    let len = per_channel.checked_mul(u64::from(channels.max(1)))?;
    usize::try_from(len).ok().filter(|len| *len > 0)
}

fn rms(frame: &[i16]) -> f64 {
    let sum: f64 = frame.iter().map(|s| f64::from(*s).powi(2)).sum();
    (sum / frame.len() as f64).sqrt()
}
