//! Spectral processing utilities (STFT, inverse STFT, flux, median filtering)

use ndarray::{Array2, Axis};
use rustfft::{num_complex::Complex32, FftPlanner};

/// Squared-window sums below this are treated as zero during overlap-add
const WINDOW_SUM_FLOOR: f32 = 1e-8;

/// STFT data structure
///
/// Frames are centered: frame `t` is centered on sample `t * hop_length` of the
/// unpadded signal, with `n_fft / 2` zeros padded on both sides.
#[derive(Debug, Clone)]
pub struct StftData {
    /// Complex spectrogram, shape `(n_fft / 2 + 1, n_frames)`
    pub s: Array2<Complex32>,
    pub n_fft: usize,
    pub hop_length: usize,
    pub sample_rate: u32,
}

impl StftData {
    pub fn n_bins(&self) -> usize {
        self.s.nrows()
    }

    pub fn n_frames(&self) -> usize {
        self.s.ncols()
    }

    /// Time in seconds of a frame center
    pub fn frame_time(&self, frame_idx: usize) -> f64 {
        frame_idx as f64 * self.hop_length as f64 / self.sample_rate as f64
    }
}

/// Number of centered frames produced for a signal of `len` samples
pub fn n_frames_for(len: usize, hop_length: usize) -> usize {
    1 + len / hop_length
}

/// Compute centered STFT of audio signal
pub fn stft(y: &[f32], n_fft: usize, hop_length: usize, window: &str, sample_rate: u32) -> StftData {
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let pad = n_fft / 2;
    let n_frames = n_frames_for(y.len(), hop_length);
    let n_bins = n_fft / 2 + 1;
    let mut s = Array2::<Complex32>::zeros((n_bins, n_frames));

    let window_fn = generate_window(window, n_fft);
    let mut frame = vec![Complex32::new(0.0, 0.0); n_fft];

    for frame_idx in 0..n_frames {
        // Position of the frame start in the unpadded signal
        let start = (frame_idx * hop_length) as isize - pad as isize;

        for (i, slot) in frame.iter_mut().enumerate() {
            let idx = start + i as isize;
            let sample = if idx >= 0 && (idx as usize) < y.len() {
                y[idx as usize]
            } else {
                0.0
            };
            *slot = Complex32::new(sample * window_fn[i], 0.0);
        }

        fft.process(&mut frame);

        for (i, &val) in frame[..n_bins].iter().enumerate() {
            s[[i, frame_idx]] = val;
        }
    }

    StftData {
        s,
        n_fft,
        hop_length,
        sample_rate,
    }
}

/// Generate window function
///
/// `"hann"` is the periodic Hann window, which satisfies the overlap-add
/// constraint for hops that divide `size / 2`.
pub fn generate_window(window_type: &str, size: usize) -> Vec<f32> {
    match window_type {
        "hann" => (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
            .collect(),
        _ => vec![1.0; size], // Rectangular window as fallback
    }
}

/// Compute magnitude spectrogram
pub fn magnitude_spectrogram(stft_data: &StftData) -> Array2<f32> {
    stft_data.s.map(|c| c.norm())
}

/// Logarithmic magnitude compression `log(1 + gamma * |X|)`
pub fn log_compress(mag: &Array2<f32>, gamma: f32) -> Array2<f32> {
    if gamma <= 0.0 {
        return mag.clone();
    }
    mag.map(|&m| (gamma * m).ln_1p())
}

/// Compute spectral flux (positive differences only)
///
/// Frame 0 is compared against silence, so energy present at the very start of
/// the signal registers as an increase.
pub fn spectral_flux(mag_spec: &Array2<f32>) -> Vec<f32> {
    let n_frames = mag_spec.ncols();
    let mut flux = vec![0.0; n_frames];

    if n_frames == 0 {
        return flux;
    }

    flux[0] = mag_spec.column(0).iter().filter(|&&m| m > 0.0).sum();

    for t in 1..n_frames {
        let mut frame_flux = 0.0;
        for f in 0..mag_spec.nrows() {
            let diff = mag_spec[[f, t]] - mag_spec[[f, t - 1]];
            if diff > 0.0 {
                frame_flux += diff;
            }
        }
        flux[t] = frame_flux;
    }

    flux
}

/// Compute inverse STFT of a centered complex spectrogram
///
/// Overlap-add is normalized by the summed squared window, and the result is
/// trimmed (or zero-extended) to `length` samples.
pub fn inverse_stft(
    s: &Array2<Complex32>,
    n_fft: usize,
    hop_length: usize,
    window: &str,
    length: usize,
) -> Vec<f32> {
    let n_frames = s.ncols();
    if n_frames == 0 {
        return vec![0.0; length];
    }

    let mut planner = FftPlanner::<f32>::new();
    let ifft = planner.plan_fft_inverse(n_fft);

    let window_fn = generate_window(window, n_fft);
    let padded_length = (n_frames - 1) * hop_length + n_fft;

    let mut y = vec![0.0f32; padded_length];
    let mut window_sum = vec![0.0f32; padded_length];
    let mut frame: Vec<Complex32> = Vec::with_capacity(n_fft);

    for frame_idx in 0..n_frames {
        frame.clear();
        frame.extend(s.column(frame_idx).iter().cloned());

        // Rebuild negative frequencies (conjugate symmetric)
        for i in 1..(n_fft / 2) {
            frame.push(frame[n_fft / 2 - i].conj());
        }

        ifft.process(&mut frame);

        let start = frame_idx * hop_length;
        for i in 0..n_fft {
            let sample = frame[i].re / n_fft as f32;
            y[start + i] += sample * window_fn[i];
            window_sum[start + i] += window_fn[i] * window_fn[i];
        }
    }

    for (sample, &wss) in y.iter_mut().zip(&window_sum) {
        if wss > WINDOW_SUM_FLOOR {
            *sample /= wss;
        }
    }

    let pad = n_fft / 2;
    let mut out: Vec<f32> = y.into_iter().skip(pad).take(length).collect();
    out.resize(length, 0.0);
    out
}

/// Median filter every lane of `mag` along `axis`
///
/// Edges are handled by mirror reflection (`d c b a | a b c d | d c b a`).
pub fn median_filter(mag: &Array2<f32>, axis: Axis, kernel: usize) -> Array2<f32> {
    let kernel = kernel.max(1);
    let half = (kernel / 2) as isize;
    let mut out = Array2::<f32>::zeros(mag.raw_dim());
    let mut window: Vec<f32> = Vec::with_capacity(kernel);

    for (lane_in, mut lane_out) in mag.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let n = lane_in.len();
        for i in 0..n {
            window.clear();
            for k in 0..kernel as isize {
                let j = reflect_index(i as isize + k - half, n);
                window.push(lane_in[j]);
            }
            let mid = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            lane_out[i] = *median;
        }
    }

    out
}

/// Map an out-of-range index back into `0..n` by mirror reflection
fn reflect_index(idx: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let mut i = idx.rem_euclid(period);
    if i >= n {
        i = period - i - 1;
    }
    i as usize
}
