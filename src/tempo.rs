//! Global tempo estimation
//!
//! The full (non-separated) signal is reduced to a spectral-flux novelty curve,
//! whose autocorrelation is searched over the lags of a BPM range. A log-normal
//! prior over tempo, centred on a typical BPM, breaks ties between octave
//! related candidates (half and double tempo).

use crate::config::{Config, TempoConfig};
use crate::error::{ConvertError, Result as ConvertResult};
use crate::passes::pass_1::novelty_curve;
use serde::{Deserialize, Serialize};

/// Tempo estimate for a whole signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub bpm: f64,
    /// Normalized autocorrelation at the chosen lag, in [0, 1]; 0 when the
    /// signal carried no periodicity and the prior centre was returned
    pub strength: f32,
}

/// Outcome of comparing a caller-supplied BPM against the detected one
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BpmCheck {
    pub provided: f64,
    pub detected: f64,
    pub mismatch: bool,
}

/// True when `provided` deviates from `detected` by more than `tolerance` BPM
pub fn bpm_mismatch(provided: f64, detected: f64, tolerance: f64) -> bool {
    (provided - detected).abs() > tolerance
}

/// Log-normal prior weight of a tempo, 1.0 at the centre
fn tempo_prior(bpm: f64, tempo: &TempoConfig) -> f64 {
    let octaves = (bpm / tempo.prior_center_bpm as f64).log2();
    let std = tempo.prior_octave_std as f64;
    (-0.5 * (octaves / std).powi(2)).exp()
}

/// Autocorrelation at `lag`, normalized by the number of overlapping frames
fn autocorrelation(signal: &[f32], lag: usize) -> f64 {
    if lag >= signal.len() {
        return 0.0;
    }
    let count = signal.len() - lag;
    let sum: f64 = signal[..count]
        .iter()
        .zip(&signal[lag..])
        .map(|(&a, &b)| a as f64 * b as f64)
        .sum();
    sum / count as f64
}

/// Vertex offset of the parabola through three equally spaced points
fn parabolic_offset(left: f64, center: f64, right: f64) -> f64 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Estimate one global BPM value from a mono signal
///
/// Fails with `Analysis` on empty input, on input shorter than one analysis
/// frame, and when the signal is too short to hold a single beat period of the
/// configured range. A signal without any periodicity (e.g. silence) returns
/// the prior centre with zero strength.
pub fn estimate_tempo(y: &[f32], sr: u32, config: &Config) -> ConvertResult<TempoEstimate> {
    let tempo = &config.tempo;
    let n_fft = config.stft.n_fft;

    if y.is_empty() {
        return Err(ConvertError::Analysis(
            "Cannot estimate tempo of an empty signal".to_string(),
        ));
    }
    if sr == 0 {
        return Err(ConvertError::Analysis("Sample rate is zero".to_string()));
    }
    if y.len() < n_fft {
        return Err(ConvertError::Analysis(format!(
            "Signal too short for tempo estimation: {} samples < {} frame",
            y.len(),
            n_fft
        )));
    }

    let mut novelty = novelty_curve(
        y,
        sr,
        n_fft,
        tempo.hop_length,
        &config.stft.window,
        config.onset.log_compression,
    );
    let mean = novelty.iter().sum::<f32>() / novelty.len() as f32;
    for v in novelty.iter_mut() {
        *v -= mean;
    }

    let frame_rate = sr as f64 / tempo.hop_length as f64;
    let lag_for = |bpm: f64| 60.0 * frame_rate / bpm;

    let min_lag = (lag_for(tempo.max_bpm as f64).ceil() as usize).max(1);
    // The slowest lag must leave at least one overlapping pair
    let max_lag = (lag_for(tempo.min_bpm as f64).floor() as usize).min(novelty.len() - 1);

    if min_lag > max_lag {
        return Err(ConvertError::Analysis(format!(
            "Signal too short to hold a beat at {:.0} BPM",
            tempo.max_bpm
        )));
    }

    let zero_lag = autocorrelation(&novelty, 0);
    let weighted =
        |lag: usize| autocorrelation(&novelty, lag) * tempo_prior(lag_for(lag as f64), tempo);

    let mut best: Option<(usize, f64)> = None;
    for lag in min_lag..=max_lag {
        let score = weighted(lag);
        if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((lag, score));
        }
    }

    let (best_lag, best_score) = match best {
        Some(found) => found,
        None => {
            log::warn!(
                "No periodicity found, falling back to {:.0} BPM",
                tempo.prior_center_bpm
            );
            return Ok(TempoEstimate {
                bpm: tempo.prior_center_bpm as f64,
                strength: 0.0,
            });
        }
    };

    // Neighbours outside the search range still shape the parabola
    let left = if best_lag > 1 { weighted(best_lag - 1) } else { best_score };
    let right = if best_lag + 1 < novelty.len() {
        weighted(best_lag + 1)
    } else {
        best_score
    };
    let refined_lag = best_lag as f64 + parabolic_offset(left, best_score, right);

    let bpm = lag_for(refined_lag).clamp(tempo.min_bpm as f64, tempo.max_bpm as f64);
    let strength = if zero_lag > 0.0 {
        (autocorrelation(&novelty, best_lag) / zero_lag).clamp(0.0, 1.0) as f32
    } else {
        0.0
    };

    log::debug!(
        "Tempo lag {:.2} frames at {:.1} frames/s, strength {:.2}",
        refined_lag,
        frame_rate,
        strength
    );

    Ok(TempoEstimate { bpm, strength })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prior_prefers_centre() {
        let tempo = TempoConfig::default();
        assert!((tempo_prior(120.0, &tempo) - 1.0).abs() < 1e-12);
        assert!(tempo_prior(100.0, &tempo) > tempo_prior(50.0, &tempo));
        assert!(tempo_prior(100.0, &tempo) > tempo_prior(200.0, &tempo));
        // Symmetric in octaves
        assert!((tempo_prior(60.0, &tempo) - tempo_prior(240.0, &tempo)).abs() < 1e-12);
    }

    #[test]
    fn test_parabolic_offset() {
        assert_eq!(parabolic_offset(1.0, 2.0, 1.0), 0.0);
        assert!(parabolic_offset(1.0, 2.0, 1.5) > 0.0);
        assert!(parabolic_offset(1.5, 2.0, 1.0) < 0.0);
        assert_eq!(parabolic_offset(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_autocorrelation_of_impulse_train() {
        let mut signal = vec![0.0f32; 40];
        for i in (0..40).step_by(10) {
            signal[i] = 1.0;
        }
        assert!(autocorrelation(&signal, 10) > autocorrelation(&signal, 5));
        assert_eq!(autocorrelation(&signal, 40), 0.0);
    }

    #[test]
    fn test_bpm_mismatch() {
        assert!(!bpm_mismatch(120.0, 115.0, 10.0));
        assert!(bpm_mismatch(120.0, 100.0, 10.0));
        assert!(!bpm_mismatch(120.0, 110.0, 10.0));
    }

    #[test]
    fn test_degenerate_input_errors() {
        let config = Config::default();
        assert!(matches!(
            estimate_tempo(&[], 22050, &config),
            Err(ConvertError::Analysis(_))
        ));
        assert!(matches!(
            estimate_tempo(&[0.1; 100], 22050, &config),
            Err(ConvertError::Analysis(_))
        ));
    }

    #[test]
    fn test_silence_returns_prior_centre() {
        let config = Config::default();
        let estimate = estimate_tempo(&vec![0.0; 22050 * 4], 22050, &config).unwrap();
        assert_eq!(estimate.bpm, 120.0);
        assert_eq!(estimate.strength, 0.0);
    }
}
