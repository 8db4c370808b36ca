//! Validation tests for Pass 0: Harmonic/Percussive Separation

use hit2midi::audio::AudioState;
use hit2midi::config::Config;
use hit2midi::passes::pass_0;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

/// Generate a steady tone (purely harmonic content)
fn generate_tone(n_samples: usize, sr: u32, freq: f32, amp: f32) -> Vec<f32> {
    (0..n_samples)
        .map(|i| amp * (2.0 * PI * freq * i as f32 / sr as f32).sin())
        .collect()
}

/// Generate short decaying noise bursts (purely percussive content)
fn generate_bursts(n_samples: usize, sr: u32, times_sec: &[f32], amp: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut audio = vec![0.0; n_samples];
    let burst_len = (0.01 * sr as f32) as usize;

    for &t in times_sec {
        let start = (t * sr as f32) as usize;
        for j in 0..burst_len {
            if start + j < n_samples {
                let envelope = (-(j as f32) / (0.002 * sr as f32)).exp();
                audio[start + j] += amp * envelope * rng.gen_range(-1.0f32..1.0);
            }
        }
    }

    audio
}

fn energy(samples: &[f32]) -> f32 {
    samples.iter().map(|x| x * x).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_lengths_match_input() {
        let config = Config::default();
        let sr = 22050;
        for n in [2048, 5000, 22050] {
            let y = generate_tone(n, sr, 440.0, 0.5);
            let separation = pass_0::separate(&y, sr, &config);
            assert_eq!(separation.percussive.len(), n);
            assert_eq!(separation.harmonic.len(), n);
        }
    }

    #[test]
    fn test_tone_lands_in_harmonic_component() {
        let config = Config::default();
        let sr = 22050;
        let y = generate_tone(sr as usize * 2, sr, 440.0, 0.5);

        let separation = pass_0::separate(&y, sr, &config);
        let h = energy(&separation.harmonic);
        let p = energy(&separation.percussive);
        assert!(h > 10.0 * p, "harmonic {} vs percussive {}", h, p);
    }

    #[test]
    fn test_bursts_land_in_percussive_component() {
        let config = Config::default();
        let sr = 22050;
        let y = generate_bursts(sr as usize * 2, sr, &[0.5, 1.0, 1.5], 0.8, 1);

        let separation = pass_0::separate(&y, sr, &config);
        let h = energy(&separation.harmonic);
        let p = energy(&separation.percussive);
        assert!(p > 5.0 * h, "percussive {} vs harmonic {}", p, h);
    }

    #[test]
    fn test_components_sum_to_input() {
        let config = Config::default();
        let sr = 22050;
        let n = sr as usize * 2;
        let tone = generate_tone(n, sr, 220.0, 0.3);
        let bursts = generate_bursts(n, sr, &[0.5, 1.25], 0.6, 2);
        let y: Vec<f32> = tone.iter().zip(&bursts).map(|(a, b)| a + b).collect();

        let separation = pass_0::separate(&y, sr, &config);
        let max_err = (0..n)
            .map(|i| (separation.percussive[i] + separation.harmonic[i] - y[i]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-2, "reconstruction error {}", max_err);
    }

    #[test]
    fn test_run_populates_state() {
        let config = Config::default();
        let mut state = AudioState::from_samples(generate_tone(4096, 22050, 440.0, 0.5), 22050);

        pass_0::run(&mut state, &config).unwrap();
        assert_eq!(state.percussive.as_ref().map(Vec::len), Some(4096));
        assert_eq!(state.harmonic.as_ref().map(Vec::len), Some(4096));
    }

    #[test]
    fn test_empty_input() {
        let config = Config::default();
        let separation = pass_0::separate(&[], 22050, &config);
        assert!(separation.percussive.is_empty());
        assert!(separation.harmonic.is_empty());
    }
}
