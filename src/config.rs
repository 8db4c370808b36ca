//! Configuration system for the audio-to-MIDI converter

use crate::error::{ConvertError, Result as ConvertResult};
use serde::{Deserialize, Serialize};

/// Main configuration structure
///
/// Holds every analysis constant of the pipeline. A `Config` is read once per
/// run and never mutated while a conversion is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub loader: LoaderConfig,
    pub stft: StftConfig,
    pub hpss: HpssConfig,
    pub onset: OnsetConfig,
    pub tempo: TempoConfig,
    pub velocity: VelocityConfig,
    pub midi: MidiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            loader: LoaderConfig::default(),
            stft: StftConfig::default(),
            hpss: HpssConfig::default(),
            onset: OnsetConfig::default(),
            tempo: TempoConfig::default(),
            velocity: VelocityConfig::default(),
            midi: MidiConfig::default(),
        }
    }
}

/// Audio loading configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Analysis sample rate; `None` keeps the file's native rate
    pub target_sample_rate: Option<u32>,
    /// Frames fed to the resampler per call
    pub resampler_chunk_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: Some(22050),
            resampler_chunk_size: 1024,
        }
    }
}

/// STFT configuration shared by separation and onset detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StftConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub window: String,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            window: "hann".to_string(),
        }
    }
}

/// HPSS (Harmonic/Percussive Source Separation) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HpssConfig {
    /// Median filter length along time, in frames
    pub harmonic_kernel: usize,
    /// Median filter length along frequency, in bins
    pub percussive_kernel: usize,
    /// Separation margin; values above 1 leave more energy in neither component
    pub margin: f32,
    /// Soft-mask exponent
    pub power: f32,
}

impl Default for HpssConfig {
    fn default() -> Self {
        Self {
            harmonic_kernel: 31,
            percussive_kernel: 31,
            margin: 1.0,
            power: 2.0,
        }
    }
}

/// Onset detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    /// Gamma of `log(1 + gamma * |X|)`; 0 disables compression
    pub log_compression: f32,
    /// Half-width of the adaptive threshold window
    pub threshold_window_sec: f32,
    /// Standard deviation multiplier of the adaptive threshold
    pub threshold_k: f32,
    /// Constant offset added to the adaptive threshold (novelty is in [0, 1])
    pub delta: f32,
    /// Half-width of the local-maximum neighbourhood
    pub local_max_window_sec: f32,
    /// Minimum time between two accepted onsets
    pub min_spacing_sec: f32,
    /// Peak level below which the signal counts as silent
    pub silence_threshold_db: f32,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            log_compression: 1.0,
            threshold_window_sec: 0.15,
            threshold_k: 1.0,
            delta: 0.07,
            local_max_window_sec: 0.03,
            min_spacing_sec: 0.03,
            silence_threshold_db: -70.0,
        }
    }
}

/// Tempo estimation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    /// Hop of the tempo novelty curve; finer than onset hop for lag resolution
    pub hop_length: usize,
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Center of the log-normal tempo prior
    pub prior_center_bpm: f32,
    /// Width of the tempo prior in octaves
    pub prior_octave_std: f32,
    /// Deviation between provided and detected BPM that triggers a warning
    pub mismatch_warning_bpm: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            hop_length: 256,
            min_bpm: 40.0,
            max_bpm: 240.0,
            prior_center_bpm: 120.0,
            prior_octave_std: 1.0,
            mismatch_warning_bpm: 10.0,
        }
    }
}

/// Dynamic velocity configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Duration of the peak-amplitude window starting at each onset
    pub window_sec: f32,
    /// Sensitivity applied to the window peak before scaling to 0-127
    pub gain: f32,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_sec: 0.05,
            gain: 1.5,
        }
    }
}

/// MIDI export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub ticks_per_beat: u16,
    /// Note length is `ticks_per_beat / note_duration_divisor` (16 = 1/64 note)
    pub note_duration_divisor: u16,
    pub channel: u8,
    /// Emit a Set Tempo meta event matching the conversion BPM
    pub write_tempo: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            ticks_per_beat: 480,
            note_duration_divisor: 16,
            channel: 0,
            write_tempo: true,
        }
    }
}

impl MidiConfig {
    /// Fixed note-off duration in ticks
    pub fn note_duration_ticks(&self) -> u32 {
        (self.ticks_per_beat / self.note_duration_divisor.max(1)) as u32
    }
}

/// Per-run conversion parameters supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionParams {
    pub bpm: f64,
    pub midi_note: u8,
    pub velocity: u8,
    pub dynamic_velocity: bool,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            midi_note: 36,
            velocity: 90,
            dynamic_velocity: false,
        }
    }
}

impl ConversionParams {
    pub fn new(bpm: f64, midi_note: u8, velocity: u8, dynamic_velocity: bool) -> Self {
        Self {
            bpm,
            midi_note,
            velocity,
            dynamic_velocity,
        }
    }

    /// Check ranges: BPM finite and positive, note 0-127, velocity 1-127
    pub fn validate(&self) -> ConvertResult<()> {
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(ConvertError::InvalidParameter(format!(
                "BPM must be a positive finite number, got {}",
                self.bpm
            )));
        }
        if self.midi_note > 127 {
            return Err(ConvertError::InvalidParameter(format!(
                "MIDI note must be in 0-127, got {}",
                self.midi_note
            )));
        }
        if !(1..=127).contains(&self.velocity) {
            return Err(ConvertError::InvalidParameter(format!(
                "Velocity must be in 1-127, got {}",
                self.velocity
            )));
        }
        Ok(())
    }
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> ConvertResult<()> {
    let invalid = |msg: String| Err(ConvertError::InvalidParameter(msg));

    if config.stft.n_fft < 2 || config.stft.n_fft % 2 != 0 {
        return invalid(format!("n_fft must be even and >= 2, got {}", config.stft.n_fft));
    }
    if config.stft.hop_length == 0 || config.stft.hop_length > config.stft.n_fft {
        return invalid(format!(
            "hop_length must be in 1..=n_fft, got {}",
            config.stft.hop_length
        ));
    }
    if config.tempo.hop_length == 0 {
        return invalid("tempo hop_length must be > 0".to_string());
    }
    if config.hpss.harmonic_kernel == 0 || config.hpss.percussive_kernel == 0 {
        return invalid("HPSS kernels must be > 0".to_string());
    }
    if config.hpss.margin < 1.0 || config.hpss.power <= 0.0 {
        return invalid(format!(
            "HPSS margin must be >= 1 and power > 0, got margin {} power {}",
            config.hpss.margin, config.hpss.power
        ));
    }
    if config.onset.min_spacing_sec < 0.0 || config.onset.threshold_window_sec < 0.0 {
        return invalid("onset windows must be non-negative".to_string());
    }
    if !(config.tempo.min_bpm > 0.0 && config.tempo.min_bpm < config.tempo.max_bpm) {
        return invalid(format!(
            "tempo range must satisfy 0 < min < max, got {}-{}",
            config.tempo.min_bpm, config.tempo.max_bpm
        ));
    }
    if config.tempo.prior_octave_std <= 0.0 {
        return invalid("tempo prior_octave_std must be > 0".to_string());
    }
    if config.velocity.window_sec <= 0.0 || config.velocity.gain <= 0.0 {
        return invalid("velocity window and gain must be > 0".to_string());
    }
    if config.midi.ticks_per_beat == 0 || config.midi.ticks_per_beat > 0x7FFF {
        return invalid(format!(
            "ticks_per_beat must be in 1-32767, got {}",
            config.midi.ticks_per_beat
        ));
    }
    if config.midi.note_duration_divisor == 0
        || config.midi.note_duration_divisor > config.midi.ticks_per_beat
    {
        return invalid(format!(
            "note_duration_divisor must be in 1..=ticks_per_beat, got {}",
            config.midi.note_duration_divisor
        ));
    }
    if config.midi.channel > 15 {
        return invalid(format!("MIDI channel must be in 0-15, got {}", config.midi.channel));
    }
    if let Some(sr) = config.loader.target_sample_rate {
        if sr == 0 {
            return invalid("target_sample_rate must be > 0".to_string());
        }
    }
    if config.loader.resampler_chunk_size == 0 {
        return invalid("resampler_chunk_size must be > 0".to_string());
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
