//! Percussive Audio-to-MIDI Conversion
//!
//! A deterministic signal-processing pipeline that turns a percussive
//! recording into a single-track MIDI file: harmonic/percussive separation,
//! onset detection, velocity mapping and tick quantization, plus an
//! independent global tempo estimator.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod job;
pub mod midi;
pub mod passes;
pub mod spectral;
pub mod tempo;

pub use analysis::{ConversionReport, NoteEvent};
pub use audio::{AudioState, OnsetEvent};
pub use config::{Config, ConversionParams};
pub use error::{ConvertError, Result as ConvertResult};
pub use job::{CancelToken, ConversionJob, ConversionRequest};
pub use tempo::{BpmCheck, TempoEstimate};

use std::path::Path;

/// Main processing pipeline for audio-to-MIDI conversion
#[derive(Debug, Clone, Default)]
pub struct AudioToMidi {
    config: Config,
}

impl AudioToMidi {
    /// Create a new processor with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Convert an audio file to a MIDI file; returns the number of onsets
    pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        audio_path: P,
        output_path: Q,
        params: &ConversionParams,
    ) -> ConvertResult<usize> {
        self.convert_with_report(audio_path, output_path, params, &CancelToken::new())
            .map(|report| report.onset_count)
    }

    /// Convert an audio file, observing `cancel` between stages
    ///
    /// Nothing is written to `output_path` unless the whole run succeeds.
    pub fn convert_with_report<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        audio_path: P,
        output_path: Q,
        params: &ConversionParams,
        cancel: &CancelToken,
    ) -> ConvertResult<ConversionReport> {
        self.validate(params)?;

        log::info!("Loading {}", audio_path.as_ref().display());
        let state = AudioState::load(audio_path, &self.config.loader)?;
        cancel.check()?;

        let (report, bytes) = self.process(state, params, cancel)?;
        midi::write_midi_file(output_path, &bytes)?;
        Ok(report)
    }

    /// Run the pipeline on a decoded buffer and return the report and MIDI bytes
    pub fn render_samples(
        &self,
        samples: Vec<f32>,
        sr: u32,
        params: &ConversionParams,
        cancel: &CancelToken,
    ) -> ConvertResult<(ConversionReport, Vec<u8>)> {
        self.validate(params)?;
        if sr == 0 {
            return Err(ConvertError::InvalidParameter(
                "Sample rate must be > 0".to_string(),
            ));
        }
        cancel.check()?;
        self.process(AudioState::from_samples(samples, sr), params, cancel)
    }

    /// Run the pipeline on a decoded buffer and write the MIDI file
    pub fn convert_samples<Q: AsRef<Path>>(
        &self,
        samples: Vec<f32>,
        sr: u32,
        output_path: Q,
        params: &ConversionParams,
    ) -> ConvertResult<usize> {
        let (report, bytes) = self.render_samples(samples, sr, params, &CancelToken::new())?;
        midi::write_midi_file(output_path, &bytes)?;
        Ok(report.onset_count)
    }

    /// Estimate the global tempo of an audio file
    pub fn estimate_bpm<P: AsRef<Path>>(&self, audio_path: P) -> ConvertResult<f64> {
        config::validate_config(&self.config)?;
        let (samples, sr) = audio::load_audio_file(audio_path, &self.config.loader)?;
        Ok(self.estimate_bpm_samples(&samples, sr)?.bpm)
    }

    /// Estimate the global tempo of a decoded buffer
    pub fn estimate_bpm_samples(&self, samples: &[f32], sr: u32) -> ConvertResult<TempoEstimate> {
        config::validate_config(&self.config)?;
        let estimate = tempo::estimate_tempo(samples, sr, &self.config)?;
        log::info!(
            "Estimated tempo: {:.1} BPM (strength {:.2})",
            estimate.bpm,
            estimate.strength
        );
        Ok(estimate)
    }

    /// Compare a caller-supplied BPM with the detected tempo of an audio file
    ///
    /// Logs a warning when they differ by more than `tempo.mismatch_warning_bpm`.
    pub fn cross_check_bpm<P: AsRef<Path>>(
        &self,
        audio_path: P,
        provided_bpm: f64,
    ) -> ConvertResult<BpmCheck> {
        let detected = self.estimate_bpm(audio_path)?;
        let mismatch = tempo::bpm_mismatch(
            provided_bpm,
            detected,
            self.config.tempo.mismatch_warning_bpm as f64,
        );
        if mismatch {
            log::warn!(
                "Provided BPM {:.1} differs from detected BPM {:.1}",
                provided_bpm,
                detected
            );
        }
        Ok(BpmCheck {
            provided: provided_bpm,
            detected,
            mismatch,
        })
    }

    fn validate(&self, params: &ConversionParams) -> ConvertResult<()> {
        params.validate()?;
        config::validate_config(&self.config)
    }

    /// Execute the passes and render the MIDI bytes
    fn process(
        &self,
        mut state: AudioState,
        params: &ConversionParams,
        cancel: &CancelToken,
    ) -> ConvertResult<(ConversionReport, Vec<u8>)> {
        if state.y.is_empty() {
            return Err(ConvertError::Analysis("Audio contains no samples".to_string()));
        }

        log::info!(
            "Converting {:.2}s at {} Hz ({} samples)",
            state.duration_sec(),
            state.sr,
            state.n_samples()
        );

        // Pass 0: Harmonic/Percussive Separation
        passes::pass_0::run(&mut state, &self.config)?;
        cancel.check()?;

        // Pass 1: Onset Detection
        passes::pass_1::run(&mut state, &self.config)?;
        cancel.check()?;

        // Pass 2: Velocity Mapping
        passes::pass_2::run(&mut state, &self.config, params)?;

        // Pass 3: Tick Quantization
        passes::pass_3::run(&mut state, &self.config, params)?;
        cancel.check()?;

        let bytes = midi::render_midi(&state.note_events, params, &self.config.midi)?;
        let report = ConversionReport::from_state(&state, params, &self.config);

        log::info!("✓ Converted {} onsets", report.onset_count);
        Ok((report, bytes))
    }
}

/// Convert an audio file to MIDI with the default configuration
///
/// Returns the number of onsets written.
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
    audio_path: P,
    output_path: Q,
    bpm: f64,
    midi_note: u8,
    velocity: u8,
    dynamic_velocity: bool,
) -> ConvertResult<usize> {
    let params = ConversionParams::new(bpm, midi_note, velocity, dynamic_velocity);
    AudioToMidi::default().convert(audio_path, output_path, &params)
}

/// Estimate the global tempo of an audio file with the default configuration
pub fn estimate_bpm<P: AsRef<Path>>(audio_path: P) -> ConvertResult<f64> {
    AudioToMidi::default().estimate_bpm(audio_path)
}
