//! End-to-end tests: audio file in, MIDI file out

use hit2midi::config::{Config, ConversionParams};
use hit2midi::error::ConvertError;
use hit2midi::job::{CancelToken, ConversionJob, ConversionRequest};
use hit2midi::{analysis, convert, estimate_bpm, AudioToMidi};
use midly::{MidiMessage, Smf, TrackEventKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

/// Noise bursts at the given times
fn generate_hits(n_samples: usize, sr: u32, times_sec: &[f32], seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut audio = vec![0.0; n_samples];
    let hit_len = (0.01 * sr as f32) as usize;

    for &t in times_sec {
        let start = (t * sr as f32) as usize;
        for j in 0..hit_len {
            if start + j < n_samples {
                let envelope = (-(j as f32) / (0.002 * sr as f32)).exp();
                audio[start + j] += 0.8 * envelope * rng.gen_range(-1.0f32..1.0);
            }
        }
    }

    audio
}

/// Write samples as a 16-bit PCM WAV file
fn write_wav(path: &Path, samples: &[f32], sr: u32, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: sr,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        for _ in 0..channels {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scratch_dir(name: &str) -> PathBuf {
    init_logging();
    let dir = std::env::temp_dir().join(format!(
        "hit2midi_pipeline_{}_{}",
        name,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn note_on_deltas(bytes: &[u8]) -> Vec<u32> {
    let smf = Smf::parse(bytes).unwrap();
    smf.tracks[0]
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { .. },
                    ..
                }
            )
        })
        .map(|e| e.delta.as_int())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_single_hit_wav() {
        let dir = scratch_dir("single_hit");
        let audio = dir.join("hit.wav");
        let output = dir.join("hit.mid");
        write_wav(&audio, &generate_hits(44100, 22050, &[1.0], 1), 22050, 1);

        let count = convert(&audio, &output, 120.0, 36, 100, false).unwrap();
        assert_eq!(count, 1);

        let deltas = note_on_deltas(&std::fs::read(&output).unwrap());
        assert_eq!(deltas.len(), 1);
        assert!((deltas[0] as i64 - 960).abs() <= 48, "delta {}", deltas[0]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stereo_input_at_other_rate_is_resampled() {
        let dir = scratch_dir("stereo");
        let audio = dir.join("hits.wav");
        let output = dir.join("hits.mid");
        let sr = 44100;
        write_wav(&audio, &generate_hits(sr as usize * 3, sr, &[0.5, 1.5, 2.5], 2), sr, 2);

        let converter = AudioToMidi::new(Config::default());
        let report = converter
            .convert_with_report(&audio, &output, &ConversionParams::default(), &CancelToken::new())
            .unwrap();

        assert_eq!(report.sample_rate, 22050);
        assert_eq!(report.onset_count, 3);
        assert!((report.duration_sec - 3.0).abs() < 0.01);
        for (t, expected) in report.onset_times_sec.iter().zip([0.5f64, 1.5, 2.5]) {
            assert!((t - expected).abs() < 0.06, "onset {} vs {}", t, expected);
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_silent_file_writes_empty_midi() {
        let dir = scratch_dir("silent");
        let audio = dir.join("silence.wav");
        let output = dir.join("silence.mid");
        write_wav(&audio, &vec![0.0; 44100], 22050, 1);

        let count = convert(&audio, &output, 120.0, 36, 100, true).unwrap();
        assert_eq!(count, 0);
        assert!(note_on_deltas(&std::fs::read(&output).unwrap()).is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_repeated_runs_are_byte_identical() {
        let dir = scratch_dir("idempotent");
        let audio = dir.join("pattern.wav");
        let first = dir.join("first.mid");
        let second = dir.join("second.mid");
        write_wav(
            &audio,
            &generate_hits(22050 * 3, 22050, &[0.25, 0.75, 1.1, 2.0], 3),
            22050,
            1,
        );

        convert(&audio, &first, 128.0, 38, 90, true).unwrap();
        convert(&audio, &second, 128.0, 38, 90, true).unwrap();
        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_error_kinds() {
        let dir = scratch_dir("errors");
        let output = dir.join("out.mid");

        // Missing input
        match convert(dir.join("absent.wav"), &output, 120.0, 36, 100, false) {
            Err(ConvertError::Decode(_)) => {}
            other => panic!("expected decode error, got {:?}", other),
        }

        // Corrupt input
        let corrupt = dir.join("corrupt.wav");
        std::fs::write(&corrupt, b"definitely not audio").unwrap();
        match convert(&corrupt, &output, 120.0, 36, 100, false) {
            Err(ConvertError::Decode(_)) => {}
            other => panic!("expected decode error, got {:?}", other),
        }
        let corrupt_mp3 = dir.join("corrupt.mp3");
        std::fs::write(&corrupt_mp3, b"definitely not audio").unwrap();
        assert!(matches!(
            convert(&corrupt_mp3, &output, 120.0, 36, 100, false),
            Err(ConvertError::Decode(_))
        ));

        // Empty input
        let empty = dir.join("empty.wav");
        write_wav(&empty, &[], 22050, 1);
        assert!(matches!(
            convert(&empty, &output, 120.0, 36, 100, false),
            Err(ConvertError::Analysis(_))
        ));

        // Out-of-range parameters
        let audio = dir.join("hit.wav");
        write_wav(&audio, &generate_hits(44100, 22050, &[1.0], 4), 22050, 1);
        assert!(matches!(
            convert(&audio, &output, 0.0, 36, 100, false),
            Err(ConvertError::InvalidParameter(_))
        ));
        assert!(matches!(
            convert(&audio, &output, 120.0, 200, 100, false),
            Err(ConvertError::InvalidParameter(_))
        ));
        assert!(matches!(
            convert(&audio, &output, 120.0, 36, 0, false),
            Err(ConvertError::InvalidParameter(_))
        ));

        // Unwritable destination
        assert!(matches!(
            convert(&audio, dir.join("no_such_dir").join("out.mid"), 120.0, 36, 100, false),
            Err(ConvertError::Io(_))
        ));

        // No failure above produced an output file
        assert!(!output.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_cancelled_run_writes_nothing() {
        let dir = scratch_dir("cancelled");
        let audio = dir.join("hit.wav");
        let output = dir.join("hit.mid");
        write_wav(&audio, &generate_hits(44100, 22050, &[1.0], 5), 22050, 1);

        let cancel = CancelToken::new();
        cancel.cancel();
        let converter = AudioToMidi::new(Config::default());
        assert_eq!(
            converter
                .convert_with_report(&audio, &output, &ConversionParams::default(), &cancel)
                .unwrap_err(),
            ConvertError::Cancelled
        );
        assert!(!output.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_background_job_completes() {
        let dir = scratch_dir("job");
        let audio = dir.join("hits.wav");
        let output = dir.join("hits.mid");
        write_wav(&audio, &generate_hits(22050 * 2, 22050, &[0.5, 1.5], 6), 22050, 1);

        let request = ConversionRequest::new(&audio, &output, ConversionParams::default());
        let job = ConversionJob::spawn(AudioToMidi::new(Config::default()), request).unwrap();
        let report = job.join().unwrap();

        assert_eq!(report.onset_count, 2);
        assert!(output.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_estimate_bpm_from_file() {
        let dir = scratch_dir("bpm");
        let audio = dir.join("clicks.wav");
        let sr = 22050;
        let period = 60.0 / 100.0;
        let times: Vec<f32> = (0..17).map(|i| i as f32 * period).collect();
        write_wav(&audio, &generate_hits(sr as usize * 10, sr, &times, 7), sr, 1);

        let bpm = estimate_bpm(&audio).unwrap();
        assert!((bpm - 100.0).abs() <= 2.0, "estimated {:.2}", bpm);

        let converter = AudioToMidi::new(Config::default());
        assert!(converter.cross_check_bpm(&audio, 150.0).unwrap().mismatch);
        assert!(!converter.cross_check_bpm(&audio, 101.0).unwrap().mismatch);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_report_export() {
        let dir = scratch_dir("report");
        let converter = AudioToMidi::new(Config::default());
        let (report, _) = converter
            .render_samples(
                generate_hits(44100, 22050, &[0.5, 1.2], 8),
                22050,
                &ConversionParams::new(120.0, 36, 100, true),
                &CancelToken::new(),
            )
            .unwrap();

        let path = dir.join("report.json");
        analysis::export_report(&report, &path).unwrap();
        let parsed: analysis::ConversionReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, report);
        assert_eq!(parsed.velocities.len(), parsed.onset_count);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
