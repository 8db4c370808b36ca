//! Audio I/O: decoding to a mono sample buffer, and the per-run audio state

use crate::analysis::NoteEvent;
use crate::config::LoaderConfig;
use crate::error::{ConvertError, Result as ConvertResult};
use hound::WavReader;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const RESAMPLER_SINC_LEN: usize = 256;

/// Onset event detected in the percussive signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetEvent {
    /// Time in seconds
    pub time_sec: f64,
    /// Frame index in the novelty curve
    pub frame_idx: usize,
    /// Normalized novelty at the peak, in [0, 1]
    pub strength: f32,
}

/// Audio state for one conversion run
///
/// Owns every buffer of the run; it is dropped once the MIDI file is written.
#[derive(Debug, Clone)]
pub struct AudioState {
    /// Audio samples (mono)
    pub y: Vec<f32>,
    /// Sample rate in Hz
    pub sr: u32,

    // Pass 0: Harmonic/percussive separation
    pub percussive: Option<Vec<f32>>,
    pub harmonic: Option<Vec<f32>>,

    // Pass 1: Onset detection
    pub onset_events: Vec<OnsetEvent>,

    // Pass 2: Velocity mapping, one entry per onset
    pub velocities: Vec<u8>,

    // Pass 3: Tick quantization
    pub note_events: Vec<NoteEvent>,
    /// Ticks elapsed after the last emitted note-off
    pub ticks_elapsed: u64,
}

impl AudioState {
    /// Decode an audio file and create the initial state
    pub fn load<P: AsRef<Path>>(path: P, loader: &LoaderConfig) -> ConvertResult<Self> {
        let (y, sr) = load_audio_file(path, loader)?;
        Ok(Self::from_samples(y, sr))
    }

    /// Create a state from an already decoded mono buffer
    pub fn from_samples(samples: Vec<f32>, sr: u32) -> Self {
        AudioState {
            y: samples,
            sr,
            percussive: None,
            harmonic: None,
            onset_events: Vec::new(),
            velocities: Vec::new(),
            note_events: Vec::new(),
            ticks_elapsed: 0,
        }
    }

    /// Get audio duration in seconds
    pub fn duration_sec(&self) -> f64 {
        if self.sr == 0 {
            return 0.0;
        }
        self.y.len() as f64 / self.sr as f64
    }

    /// Get number of samples
    pub fn n_samples(&self) -> usize {
        self.y.len()
    }
}

/// Decode an audio file to mono samples at the configured analysis rate
pub fn load_audio_file<P: AsRef<Path>>(
    path: P,
    loader: &LoaderConfig,
) -> ConvertResult<(Vec<f32>, u32)> {
    let (samples, sr) = decode(path.as_ref())?;

    match loader.target_sample_rate {
        Some(target) if target != sr => {
            log::debug!("Resampling {} Hz -> {} Hz", sr, target);
            let resampled = resample(&samples, sr, target, loader.resampler_chunk_size)?;
            Ok((resampled, target))
        }
        _ => Ok((samples, sr)),
    }
}

/// Decode an audio file into mono samples plus its native sample rate
///
/// WAV goes through `hound`; everything else, and WAV variants hound rejects,
/// goes through symphonia's probe.
pub fn decode<P: AsRef<Path>>(path: P) -> ConvertResult<(Vec<f32>, u32)> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConvertError::Decode(format!(
            "Audio file does not exist: {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    let (samples, sr) = match extension.as_str() {
        "wav" | "wave" => match load_wav_file(path) {
            Ok(decoded) => decoded,
            Err(wav_err) => {
                log::debug!("hound rejected {}: {}; probing", path.display(), wav_err);
                load_with_symphonia(path).map_err(|_| wav_err)?
            }
        },
        _ => load_with_symphonia(path)?,
    };

    if sr == 0 {
        return Err(ConvertError::Decode(format!(
            "Missing sample rate in {}",
            path.display()
        )));
    }

    log::debug!(
        "Decoded {}: {} samples at {} Hz",
        path.display(),
        samples.len(),
        sr
    );

    Ok((samples, sr))
}

/// Load WAV file
fn load_wav_file(path: &Path) -> ConvertResult<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(ConvertError::Decode("WAV file has no channels".to_string()));
    }

    if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
        return Err(ConvertError::Decode(format!(
            "Unsupported bit depth: {}",
            spec.bits_per_sample
        )));
    }

    let mut samples: Vec<f32> = Vec::with_capacity(reader.len() as usize);

    match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for sample in reader.samples::<i32>() {
                samples.push(sample? as f32 / max_value);
            }
        }
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                samples.push(sample?);
            }
        }
    }

    Ok((downmix(&samples, spec.channels as usize), spec.sample_rate))
}

/// Decode any container/codec symphonia can probe (MP3, FLAC, OGG, WAV, ...)
fn load_with_symphonia(path: &Path) -> ConvertResult<(Vec<f32>, u32)> {
    let file = File::open(path)
        .map_err(|e| ConvertError::Decode(format!("{}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ConvertError::Decode("No supported audio tracks found".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut mono: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                // Corrupt frame; the rest of the stream is still usable
                skipped_packets += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if channels == 0 {
            return Err(ConvertError::Decode("Stream has no channels".to_string()));
        }
        sample_rate.get_or_insert(spec.rate);

        let buf = sample_buf
            .get_or_insert_with(|| SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        buf.copy_interleaved_ref(decoded);
        mono.extend(downmix(buf.samples(), channels));
    }

    if skipped_packets > 0 {
        log::warn!(
            "Skipped {} undecodable packets in {}",
            skipped_packets,
            path.display()
        );
    }

    let sr = sample_rate
        .ok_or_else(|| ConvertError::Decode(format!("Missing sample rate in {}", path.display())))?;

    Ok((mono, sr))
}

/// Average interleaved channels down to mono
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample a mono buffer with band-limited sinc interpolation
///
/// The resampler's latency is measured with a unit impulse and removed, so
/// sample `n` of the result lines up with time `n / to_sr` of the input.
pub fn resample(
    samples: &[f32],
    from_sr: u32,
    to_sr: u32,
    chunk_size: usize,
) -> ConvertResult<Vec<f32>> {
    if from_sr == to_sr || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_sr as f64 / from_sr as f64;
    let delay = measure_resampler_delay(ratio, chunk_size)?;
    let expected = (samples.len() as f64 * ratio).round() as usize;

    let mut resampler = new_resampler(ratio, chunk_size)?;
    let out = run_resampler(&mut resampler, samples, expected + delay.max(0) as usize)?;

    let mut resampled: Vec<f32> = if delay >= 0 {
        out.into_iter().skip(delay as usize).take(expected).collect()
    } else {
        let mut shifted = vec![0.0; delay.unsigned_abs()];
        shifted.extend(out);
        shifted.truncate(expected);
        shifted
    };
    resampled.resize(expected, 0.0);
    Ok(resampled)
}

fn new_resampler(ratio: f64, chunk_size: usize) -> ConvertResult<SincFixedIn<f32>> {
    let params = SincInterpolationParameters {
        sinc_len: RESAMPLER_SINC_LEN,
        f_cutoff: 0.95,
        oversampling_factor: 256,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    SincFixedIn::<f32>::new(ratio, 1.0, params, chunk_size, 1).map_err(resampler_error)
}

/// Feed `samples` through in chunks, then flush until `min_len` outputs exist
fn run_resampler(
    resampler: &mut SincFixedIn<f32>,
    samples: &[f32],
    min_len: usize,
) -> ConvertResult<Vec<f32>> {
    let mut out: Vec<f32> = Vec::with_capacity(min_len + resampler.output_frames_max());

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= samples.len() {
        let n = resampler.input_frames_next();
        let chunk: [&[f32]; 1] = [&samples[pos..pos + n]];
        let processed = resampler
            .process(&chunk[..], None)
            .map_err(resampler_error)?;
        out.extend_from_slice(&processed[0]);
        pos += n;
    }

    if pos < samples.len() {
        let chunk: [&[f32]; 1] = [&samples[pos..]];
        let processed = resampler
            .process_partial(Some(&chunk[..]), None)
            .map_err(resampler_error)?;
        out.extend_from_slice(&processed[0]);
    }

    while out.len() < min_len {
        let processed = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(resampler_error)?;
        if processed[0].is_empty() {
            break;
        }
        out.extend_from_slice(&processed[0]);
    }

    Ok(out)
}

/// Output position of an impulse minus its ideal position `idx * ratio`
fn measure_resampler_delay(ratio: f64, chunk_size: usize) -> ConvertResult<isize> {
    let mut resampler = new_resampler(ratio, chunk_size)?;
    let len = (4 * RESAMPLER_SINC_LEN).max(2 * chunk_size);
    let idx = len / 2;
    let mut impulse = vec![0.0f32; len];
    impulse[idx] = 1.0;

    let min_len =
        (len as f64 * ratio).ceil() as usize + resampler.output_delay() + RESAMPLER_SINC_LEN;
    let out = run_resampler(&mut resampler, &impulse, min_len)?;

    let peak = out
        .iter()
        .enumerate()
        .fold((0usize, 0.0f32), |best, (i, &v)| {
            if v.abs() > best.1 {
                (i, v.abs())
            } else {
                best
            }
        })
        .0;
    let ideal = (idx as f64 * ratio).round() as isize;
    let delay = peak as isize - ideal;
    log::debug!("Resampler delay at ratio {:.4}: {} samples", ratio, delay);
    Ok(delay)
}

fn resampler_error<E: std::fmt::Display>(err: E) -> ConvertError {
    ConvertError::Decode(format!("Resampler error: {}", err))
}

/// Peak absolute amplitude in dBFS (negative infinity for silence)
pub fn peak_db(samples: &[f32]) -> f32 {
    let peak = samples.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
    if peak > 0.0 {
        20.0 * peak.log10()
    } else {
        f32::NEG_INFINITY
    }
}
