//! Analysis results: note events and the conversion report

use crate::audio::AudioState;
use crate::config::{Config, ConversionParams};
use crate::error::Result as ConvertResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One note-on/note-off pair derived from an onset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub note: u8,
    pub velocity: u8,
    /// Ticks between the previous note-off and this note-on (never negative)
    pub delta_ticks: u32,
    /// Ticks between this note-on and its note-off
    pub duration_ticks: u32,
    /// Absolute quantized position of the onset, before clamping
    pub onset_tick: u64,
}

/// Summary of one conversion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionReport {
    pub onset_count: usize,
    pub onset_times_sec: Vec<f64>,
    pub velocities: Vec<u8>,
    pub note_events: Vec<NoteEvent>,
    pub params: ConversionParams,
    pub ticks_per_beat: u16,
    /// Ticks elapsed after the final note-off
    pub total_ticks: u64,
    pub sample_rate: u32,
    pub duration_sec: f64,
}

impl ConversionReport {
    /// Build a report from a fully processed audio state
    pub fn from_state(state: &AudioState, params: &ConversionParams, config: &Config) -> Self {
        ConversionReport {
            onset_count: state.onset_events.len(),
            onset_times_sec: state.onset_events.iter().map(|e| e.time_sec).collect(),
            velocities: state.velocities.clone(),
            note_events: state.note_events.clone(),
            params: *params,
            ticks_per_beat: config.midi.ticks_per_beat,
            total_ticks: state.ticks_elapsed,
            sample_rate: state.sr,
            duration_sec: state.duration_sec(),
        }
    }
}

/// Write a conversion report as pretty-printed JSON
pub fn export_report<P: AsRef<Path>>(report: &ConversionReport, path: P) -> ConvertResult<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path.as_ref(), json)?;
    log::info!("Exported conversion report to {}", path.as_ref().display());
    Ok(())
}
