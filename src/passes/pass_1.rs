//! Pass 1: Onset Detection
//!
//! Spectral-flux novelty, adaptive mean + k·std threshold, and peak picking
//! with a minimum spacing between accepted peaks.

use crate::audio::{peak_db, AudioState, OnsetEvent};
use crate::config::{Config, OnsetConfig};
use crate::error::{ConvertError, Result as ConvertResult};
use crate::spectral::{log_compress, magnitude_spectrogram, spectral_flux, stft};
use std::iter::FusedIterator;

/// Compute the spectral-flux novelty curve of a signal
///
/// Frames whose window runs past the end of the signal are dropped: the zero
/// padding there cuts a sounding signal off and reads as a spurious onset.
/// Frame 0 is kept so energy at the very start still registers.
pub fn novelty_curve(
    y: &[f32],
    sr: u32,
    n_fft: usize,
    hop_length: usize,
    window: &str,
    log_compression: f32,
) -> Vec<f32> {
    let stft_data = stft(y, n_fft, hop_length, window, sr);
    let mag = log_compress(&magnitude_spectrogram(&stft_data), log_compression);
    let mut flux = spectral_flux(&mag);
    flux.truncate(supported_frames(y.len(), n_fft, hop_length));
    flux
}

/// Number of centered frames `i` with `i * hop + n_fft / 2 <= len`
fn supported_frames(len: usize, n_fft: usize, hop_length: usize) -> usize {
    let half = n_fft / 2;
    if len < half {
        0
    } else {
        (len - half) / hop_length + 1
    }
}

/// Compute adaptive threshold using rolling mean and std plus a constant offset
pub fn adaptive_threshold(signal: &[f32], window_frames: usize, k: f32, delta: f32) -> Vec<f32> {
    let mut thresholds = vec![0.0; signal.len()];

    for i in 0..signal.len() {
        let start = i.saturating_sub(window_frames);
        let end = signal.len().min(i + window_frames + 1);

        let window = &signal[start..end];
        let mean = window.iter().sum::<f32>() / window.len() as f32;
        let variance =
            window.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / window.len() as f32;

        thresholds[i] = mean + k * variance.sqrt() + delta;
    }

    thresholds
}

/// Lazy, ordered sequence of detected onsets
///
/// The novelty curve and thresholds are computed up front; peaks are picked as
/// the iterator advances. Iteration is single-pass; running the detector again
/// on the same input yields the same sequence.
#[derive(Debug, Clone)]
pub struct Onsets {
    novelty: Vec<f32>,
    thresholds: Vec<f32>,
    cursor: usize,
    last_peak: Option<usize>,
    local_max_frames: usize,
    min_spacing_frames: usize,
    hop_length: usize,
    sample_rate: u32,
    duration_sec: f64,
}

impl Onsets {
    fn empty(hop_length: usize, sample_rate: u32, duration_sec: f64) -> Self {
        Onsets {
            novelty: Vec::new(),
            thresholds: Vec::new(),
            cursor: 0,
            last_peak: None,
            local_max_frames: 1,
            min_spacing_frames: 1,
            hop_length,
            sample_rate,
            duration_sec,
        }
    }

    /// Normalized novelty curve the peaks are picked from
    pub fn novelty(&self) -> &[f32] {
        &self.novelty
    }

    /// Frame value is the first maximum of its neighbourhood and above threshold
    fn is_peak(&self, i: usize) -> bool {
        let value = self.novelty[i];
        if value <= self.thresholds[i] {
            return false;
        }

        let start = i.saturating_sub(self.local_max_frames);
        let end = self.novelty.len().min(i + self.local_max_frames + 1);

        // Strict on the left so a flat top yields a single peak
        self.novelty[start..i].iter().all(|&v| v < value)
            && self.novelty[i + 1..end].iter().all(|&v| v <= value)
    }

    fn frame_time(&self, frame_idx: usize) -> f64 {
        let t = frame_idx as f64 * self.hop_length as f64 / self.sample_rate as f64;
        t.clamp(0.0, self.duration_sec)
    }
}

impl Iterator for Onsets {
    type Item = OnsetEvent;

    fn next(&mut self) -> Option<OnsetEvent> {
        while self.cursor < self.novelty.len() {
            let i = self.cursor;
            self.cursor += 1;

            if let Some(last) = self.last_peak {
                if i < last + self.min_spacing_frames {
                    continue;
                }
            }

            if !self.is_peak(i) {
                continue;
            }

            self.last_peak = Some(i);
            return Some(OnsetEvent {
                time_sec: self.frame_time(i),
                frame_idx: i,
                strength: self.novelty[i],
            });
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.novelty.len() - self.cursor))
    }
}

impl FusedIterator for Onsets {}

/// Convert a duration to a frame count at the given hop
fn seconds_to_frames(sec: f32, sr: u32, hop_length: usize) -> f32 {
    sec * sr as f32 / hop_length as f32
}

/// Detect onsets in a (percussive) signal
///
/// Silent or near-silent input yields an empty sequence.
pub fn detect_onsets(y: &[f32], sr: u32, config: &Config) -> Onsets {
    let hop = config.stft.hop_length;
    let onset: &OnsetConfig = &config.onset;
    let duration_sec = if sr > 0 { y.len() as f64 / sr as f64 } else { 0.0 };

    if y.is_empty() || sr == 0 {
        return Onsets::empty(hop, sr.max(1), duration_sec);
    }

    let level_db = peak_db(y);
    if level_db < onset.silence_threshold_db {
        log::debug!(
            "  peak level {:.1} dBFS below silence gate {:.1} dBFS",
            level_db,
            onset.silence_threshold_db
        );
        return Onsets::empty(hop, sr, duration_sec);
    }

    let mut novelty = novelty_curve(
        y,
        sr,
        config.stft.n_fft,
        hop,
        &config.stft.window,
        onset.log_compression,
    );

    let max = novelty.iter().cloned().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Onsets::empty(hop, sr, duration_sec);
    }
    for v in novelty.iter_mut() {
        *v /= max;
    }

    let window_frames = seconds_to_frames(onset.threshold_window_sec, sr, hop).round() as usize;
    let thresholds = adaptive_threshold(&novelty, window_frames, onset.threshold_k, onset.delta);

    let local_max_frames = (seconds_to_frames(onset.local_max_window_sec, sr, hop).round()
        as usize)
        .max(1);
    let min_spacing_frames =
        (seconds_to_frames(onset.min_spacing_sec, sr, hop).ceil() as usize).max(1);

    Onsets {
        novelty,
        thresholds,
        cursor: 0,
        last_peak: None,
        local_max_frames,
        min_spacing_frames,
        hop_length: hop,
        sample_rate: sr,
        duration_sec,
    }
}

pub fn run(state: &mut AudioState, config: &Config) -> ConvertResult<()> {
    log::info!("Pass 1: Onset Detection");

    let percussive = state.percussive.as_ref().ok_or_else(|| {
        ConvertError::Analysis("Pass 0 must be run before Pass 1".to_string())
    })?;

    state.onset_events = detect_onsets(percussive, state.sr, config).collect();

    log::info!("  ✓ Detected {} onset events", state.onset_events.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_threshold_flat_signal() {
        let thresholds = adaptive_threshold(&[0.5; 8], 2, 1.0, 0.1);
        for t in thresholds {
            assert!((t - 0.6).abs() < 1e-6);
        }
    }

    #[test]
    fn test_peak_picking_respects_spacing() {
        let novelty = vec![0.0, 1.0, 0.0, 0.9, 0.0, 0.0, 0.0, 0.8, 0.0];
        let onsets = Onsets {
            thresholds: vec![0.2; novelty.len()],
            novelty,
            cursor: 0,
            last_peak: None,
            local_max_frames: 1,
            min_spacing_frames: 3,
            hop_length: 512,
            sample_rate: 22050,
            duration_sec: 1.0,
        };

        let frames: Vec<usize> = onsets.map(|e| e.frame_idx).collect();
        assert_eq!(frames, vec![1, 7]);
    }

    #[test]
    fn test_flat_top_yields_single_peak() {
        let novelty = vec![0.0, 1.0, 1.0, 0.0];
        let onsets = Onsets {
            thresholds: vec![0.1; novelty.len()],
            novelty,
            cursor: 0,
            last_peak: None,
            local_max_frames: 1,
            min_spacing_frames: 1,
            hop_length: 512,
            sample_rate: 22050,
            duration_sec: 1.0,
        };
        assert_eq!(onsets.count(), 1);
    }

    #[test]
    fn test_supported_frames() {
        assert_eq!(supported_frames(44100, 2048, 512), 85);
        assert_eq!(supported_frames(1024, 2048, 512), 1);
        assert_eq!(supported_frames(1023, 2048, 512), 0);
    }

    #[test]
    fn test_tone_sounding_at_the_end_has_no_trailing_onset() {
        let config = Config::default();
        let sr = 22050;
        let y: Vec<f32> = (0..sr as usize * 2)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 330.0 * i as f32 / sr as f32).sin())
            .collect();

        let novelty_len = novelty_curve(&y, sr, 2048, 512, "hann", 1.0).len();
        assert_eq!(novelty_len, 85);
        assert!((novelty_len - 1) * 512 + 1024 <= y.len());

        let onsets: Vec<OnsetEvent> = detect_onsets(&y, sr, &config).collect();
        assert_eq!(onsets.len(), 1, "onsets: {:?}", onsets);
        assert_eq!(onsets[0].frame_idx, 0);
    }

    #[test]
    fn test_silence_yields_nothing() {
        let config = Config::default();
        assert_eq!(detect_onsets(&vec![0.0; 22050], 22050, &config).count(), 0);
        assert_eq!(detect_onsets(&[], 22050, &config).count(), 0);
    }
}
