//! Pass 0: Harmonic/Percussive Separation
//!
//! Median filtering a magnitude spectrogram across frequency keeps vertical
//! (broadband, short) structures such as drum hits; filtering across time keeps
//! horizontal (sustained, tonal) structures. The two filtered spectrograms are
//! turned into soft masks, applied to the complex STFT and inverted.

use crate::audio::AudioState;
use crate::config::{Config, HpssConfig};
use crate::error::Result as ConvertResult;
use crate::spectral::{inverse_stft, magnitude_spectrogram, median_filter, stft};
use ndarray::{Array2, Axis, Zip};

/// Time-domain output of the separator, both the length of the input
#[derive(Debug, Clone)]
pub struct Separation {
    pub percussive: Vec<f32>,
    pub harmonic: Vec<f32>,
}

/// Soft Wiener-style mask `x^p / (x^p + (margin * x_ref)^p)`
///
/// Bins where both inputs are zero get a mask of 0.
pub fn soft_mask(x: &Array2<f32>, x_ref: &Array2<f32>, margin: f32, power: f32) -> Array2<f32> {
    Zip::from(x).and(x_ref).map_collect(|&a, &b| {
        let num = a.powf(power);
        let den = num + (margin * b).powf(power);
        if den > 0.0 && den.is_finite() {
            num / den
        } else {
            0.0
        }
    })
}

/// Compute harmonic and percussive masks from a magnitude spectrogram
pub fn hpss_masks(mag: &Array2<f32>, hpss: &HpssConfig) -> (Array2<f32>, Array2<f32>) {
    let harmonic_enhanced = median_filter(mag, Axis(1), hpss.harmonic_kernel);
    let percussive_enhanced = median_filter(mag, Axis(0), hpss.percussive_kernel);

    let mask_h = soft_mask(&harmonic_enhanced, &percussive_enhanced, hpss.margin, hpss.power);
    let mask_p = soft_mask(&percussive_enhanced, &harmonic_enhanced, hpss.margin, hpss.power);
    (mask_h, mask_p)
}

/// Split a mono signal into percussive and harmonic components
///
/// Input shorter than one analysis frame is returned unchanged as the
/// percussive part, with an all-zero harmonic part.
pub fn separate(y: &[f32], sr: u32, config: &Config) -> Separation {
    let n_fft = config.stft.n_fft;
    let hop = config.stft.hop_length;

    if y.len() < n_fft {
        log::debug!(
            "Signal shorter than one frame ({} < {}), skipping separation",
            y.len(),
            n_fft
        );
        return Separation {
            percussive: y.to_vec(),
            harmonic: vec![0.0; y.len()],
        };
    }

    let stft_data = stft(y, n_fft, hop, &config.stft.window, sr);
    let mag = magnitude_spectrogram(&stft_data);
    let (mask_h, mask_p) = hpss_masks(&mag, &config.hpss);

    let s_p = Zip::from(&stft_data.s).and(&mask_p).map_collect(|&x, &m| x * m);
    let s_h = Zip::from(&stft_data.s).and(&mask_h).map_collect(|&x, &m| x * m);

    Separation {
        percussive: inverse_stft(&s_p, n_fft, hop, &config.stft.window, y.len()),
        harmonic: inverse_stft(&s_h, n_fft, hop, &config.stft.window, y.len()),
    }
}

fn energy(samples: &[f32]) -> f32 {
    samples.iter().map(|&x| x * x).sum()
}

pub fn run(state: &mut AudioState, config: &Config) -> ConvertResult<()> {
    log::info!("Pass 0: Harmonic/Percussive Separation");

    let separation = separate(&state.y, state.sr, config);

    let total = energy(&state.y);
    if total > 0.0 {
        log::debug!(
            "  percussive energy {:.1}%, harmonic energy {:.1}%",
            100.0 * energy(&separation.percussive) / total,
            100.0 * energy(&separation.harmonic) / total
        );
    }

    state.percussive = Some(separation.percussive);
    state.harmonic = Some(separation.harmonic);

    log::info!("  ✓ Pass 0 complete");
    Ok(())
}
