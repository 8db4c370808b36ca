//! MIDI export: Standard MIDI File rendering and atomic persistence

use crate::analysis::NoteEvent;
use crate::config::{ConversionParams, MidiConfig};
use crate::error::{ConvertError, Result as ConvertResult};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Largest delta-time a variable-length quantity can hold
const MAX_DELTA: u32 = 0x0FFF_FFFF;

/// Largest Set Tempo value (microseconds per quarter note)
const MAX_TEMPO_USPQ: u32 = 0x00FF_FFFF;

fn delta(ticks: u32) -> u28 {
    if ticks > MAX_DELTA {
        log::warn!(
            "Delta of {} ticks exceeds the MIDI maximum, clamped to {}",
            ticks,
            MAX_DELTA
        );
    }
    u28::new(ticks.min(MAX_DELTA))
}

fn channel_message(channel: u8, message: MidiMessage) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel: u4::new(channel & 0x0F),
        message,
    }
}

/// Microseconds per quarter note for a BPM, clamped to the meta event range
pub fn tempo_uspq(bpm: f64) -> u32 {
    let uspq = (60_000_000.0 / bpm).round();
    if uspq.is_finite() {
        (uspq as u32).clamp(1, MAX_TEMPO_USPQ)
    } else {
        MAX_TEMPO_USPQ
    }
}

/// Render note events into format-0 Standard MIDI File bytes
pub fn render_midi(
    note_events: &[NoteEvent],
    params: &ConversionParams,
    midi: &MidiConfig,
) -> ConvertResult<Vec<u8>> {
    let mut track_events: Vec<TrackEvent<'static>> = Vec::with_capacity(note_events.len() * 2 + 2);

    if midi.write_tempo {
        track_events.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_uspq(params.bpm)))),
        });
    }

    for event in note_events {
        track_events.push(TrackEvent {
            delta: delta(event.delta_ticks),
            kind: channel_message(
                midi.channel,
                MidiMessage::NoteOn {
                    key: u7::new(event.note & 0x7F),
                    vel: u7::new(event.velocity.clamp(1, 127)),
                },
            ),
        });
        track_events.push(TrackEvent {
            delta: delta(event.duration_ticks),
            kind: channel_message(
                midi.channel,
                MidiMessage::NoteOff {
                    key: u7::new(event.note & 0x7F),
                    vel: u7::new(0),
                },
            ),
        });
    }

    track_events.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(u15::new(midi.ticks_per_beat.min(0x7FFF))),
        },
        tracks: vec![track_events],
    };

    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| ConvertError::Io(format!("Failed to serialize MIDI data: {:?}", e)))?;
    Ok(bytes)
}

/// Sibling path the file is staged at before being renamed into place
fn staging_path(path: &Path) -> ConvertResult<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        ConvertError::Io(format!("Output path has no file name: {}", path.display()))
    })?;
    let mut staged = std::ffi::OsString::from(".");
    staged.push(name);
    staged.push(".partial");
    Ok(path.with_file_name(staged))
}

/// Write bytes to `path` via a staged sibling file and a rename
///
/// Either the complete file appears at `path` or `path` is left untouched.
pub fn write_midi_file<P: AsRef<Path>>(path: P, bytes: &[u8]) -> ConvertResult<()> {
    let path = path.as_ref();
    let staged = staging_path(path)?;

    let result = File::create(&staged)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| std::fs::rename(&staged, path));

    if let Err(e) = result {
        let _ = std::fs::remove_file(&staged);
        return Err(ConvertError::Io(format!(
            "Failed to write {}: {}",
            path.display(),
            e
        )));
    }

    log::info!("Exported MIDI to {}", path.display());
    Ok(())
}

/// Render and persist note events; returns the number of notes written
pub fn export_midi<P: AsRef<Path>>(
    note_events: &[NoteEvent],
    output_path: P,
    params: &ConversionParams,
    midi: &MidiConfig,
) -> ConvertResult<usize> {
    let bytes = render_midi(note_events, params, midi)?;
    write_midi_file(output_path, &bytes)?;
    Ok(note_events.len())
}
