//! Pass 3: Tick Quantization

use crate::analysis::NoteEvent;
use crate::audio::AudioState;
use crate::config::{Config, ConversionParams};
use crate::error::{ConvertError, Result as ConvertResult};

/// Running seconds-to-ticks converter
///
/// Onsets must be pushed in ascending time order. Each push emits one note-on
/// with a non-negative delta from the previous note-off, followed by a
/// fixed-length note-off.
#[derive(Debug, Clone)]
pub struct TickQuantizer {
    ticks_per_second: f64,
    duration_ticks: u32,
    ticks_elapsed: u64,
}

impl TickQuantizer {
    pub fn new(ticks_per_beat: u16, bpm: f64, duration_ticks: u32) -> Self {
        TickQuantizer {
            ticks_per_second: ticks_per_beat as f64 * bpm / 60.0,
            duration_ticks,
            ticks_elapsed: 0,
        }
    }

    /// Absolute tick of a time in seconds: `floor(t * ticks_per_beat * bpm / 60)`
    pub fn ticks_at(&self, time_sec: f64) -> u64 {
        let ticks = (time_sec * self.ticks_per_second).floor();
        if ticks.is_finite() && ticks > 0.0 {
            ticks as u64
        } else {
            0
        }
    }

    /// Quantize the next onset and advance past its note-off
    pub fn push(&mut self, time_sec: f64, note: u8, velocity: u8) -> NoteEvent {
        let total_ticks = self.ticks_at(time_sec);
        // Overlap with the previous note-off clamps to zero
        let delta = total_ticks.saturating_sub(self.ticks_elapsed);

        // Tracks the quantized grid, not the written stream: after a clamped
        // delta the next note is still measured from this onset's own tick
        self.ticks_elapsed = total_ticks + self.duration_ticks as u64;

        let delta_ticks = u32::try_from(delta).unwrap_or_else(|_| {
            log::warn!(
                "Delta of {} ticks at {:.3} s exceeds u32, clamped to {}",
                delta,
                time_sec,
                u32::MAX
            );
            u32::MAX
        });

        NoteEvent {
            note,
            velocity,
            delta_ticks,
            duration_ticks: self.duration_ticks,
            onset_tick: total_ticks,
        }
    }

    /// Ticks elapsed after the last note-off
    pub fn ticks_elapsed(&self) -> u64 {
        self.ticks_elapsed
    }
}

/// Quantize a batch of onsets; returns the note events and the final elapsed ticks
pub fn quantize(
    onset_times_sec: &[f64],
    velocities: &[u8],
    note: u8,
    bpm: f64,
    ticks_per_beat: u16,
    duration_ticks: u32,
) -> (Vec<NoteEvent>, u64) {
    let mut pairs: Vec<(f64, u8)> = onset_times_sec
        .iter()
        .copied()
        .zip(velocities.iter().copied())
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut quantizer = TickQuantizer::new(ticks_per_beat, bpm, duration_ticks);
    let events = pairs
        .into_iter()
        .map(|(time_sec, velocity)| quantizer.push(time_sec, note, velocity))
        .collect();

    (events, quantizer.ticks_elapsed())
}

pub fn run(state: &mut AudioState, config: &Config, params: &ConversionParams) -> ConvertResult<()> {
    log::info!("Pass 3: Tick Quantization");

    if state.velocities.len() != state.onset_events.len() {
        return Err(ConvertError::Analysis(
            "Pass 2 must be run before Pass 3".to_string(),
        ));
    }

    let times: Vec<f64> = state.onset_events.iter().map(|e| e.time_sec).collect();
    let (events, ticks_elapsed) = quantize(
        &times,
        &state.velocities,
        params.midi_note,
        params.bpm,
        config.midi.ticks_per_beat,
        config.midi.note_duration_ticks(),
    );

    state.note_events = events;
    state.ticks_elapsed = ticks_elapsed;

    log::info!(
        "  ✓ Quantized {} notes over {} ticks",
        state.note_events.len(),
        state.ticks_elapsed
    );
    Ok(())
}
