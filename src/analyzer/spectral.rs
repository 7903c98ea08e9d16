//! STFT-based spectral summaries: centroid and a log-mel spectrogram.
//!
//! Both come from one pass over the same magnitude frames: Hann window,
//! 2048-point FFT, 512 hop, 128 Slaney-style mel bands, power converted to dB
//! relative to the loudest bin and floored 80 dB below it.

use rustfft::{num_complex::Complex, FftPlanner};

pub const N_FFT: usize = 2048;
pub const HOP: usize = 512;
pub const N_MELS: usize = 128;
const TOP_DB: f32 = 80.0;

/// Spectral summary of one decoded window.
#[derive(Debug, Clone, Default)]
pub struct SpectralSummary {
    /// Mean magnitude-weighted centroid over frames that carry energy.
    pub centroid_hz: f64,
    /// False when every frame is silent (centroid undefined).
    pub has_energy: bool,
    /// Time × mel-band matrix in dB (≤ 0, max 0 unless silent).
    pub mel_db: Vec<Vec<f32>>,
}

pub fn analyze(samples: &[f32], sample_rate: u32) -> SpectralSummary {
    if samples.is_empty() || sample_rate == 0 {
        return SpectralSummary::default();
    }

    let fft = FftPlanner::<f32>::new().plan_fft_forward(N_FFT);
    let window = build_hann_window(N_FFT);
    let mel_filters = build_mel_filters(N_FFT, sample_rate, N_MELS, 0.0, sample_rate as f32 / 2.0);
    let n_freqs = N_FFT / 2 + 1;
    let bin_hz: Vec<f64> = (0..n_freqs)
        .map(|k| k as f64 * sample_rate as f64 / N_FFT as f64)
        .collect();

    let padded = reflect_pad(samples, N_FFT / 2);
    let n_frames = 1 + (padded.len() - N_FFT) / HOP;

    let mut buf = vec![Complex::new(0.0f32, 0.0); N_FFT];
    let mut mel_power: Vec<Vec<f32>> = Vec::with_capacity(n_frames);
    let mut centroid_sum = 0.0f64;
    let mut centroid_frames = 0usize;

    for frame in 0..n_frames {
        let start = frame * HOP;
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = Complex::new(padded[start + i] * window[i], 0.0);
        }
        fft.process(&mut buf);

        let magnitudes: Vec<f32> = buf[..n_freqs].iter().map(|c| c.norm()).collect();

        let total: f64 = magnitudes.iter().map(|&m| m as f64).sum();
        if total > 1e-10 {
            let weighted: f64 = magnitudes
                .iter()
                .zip(&bin_hz)
                .map(|(&m, &f)| m as f64 * f)
                .sum();
            centroid_sum += weighted / total;
            centroid_frames += 1;
        }

        let bands: Vec<f32> = mel_filters
            .iter()
            .map(|filter| {
                filter
                    .iter()
                    .zip(&magnitudes)
                    .map(|(&w, &m)| w * m * m)
                    .sum()
            })
            .collect();
        mel_power.push(bands);
    }

    let centroid_hz = if centroid_frames > 0 {
        centroid_sum / centroid_frames as f64
    } else {
        0.0
    };

    SpectralSummary {
        centroid_hz,
        has_energy: centroid_frames > 0,
        mel_db: power_to_db(mel_power),
    }
}

/// `10·log10(p / max)` floored at `-TOP_DB`. Silence maps to all `-TOP_DB`.
fn power_to_db(mut power: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    let peak = power
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(0.0f32, f32::max);
    if peak <= 1e-10 {
        for row in power.iter_mut() {
            row.iter_mut().for_each(|v| *v = -TOP_DB);
        }
        return power;
    }
    let reference = peak;

    for row in power.iter_mut() {
        for v in row.iter_mut() {
            let db = 10.0 * (v.max(1e-10) / reference).log10();
            *v = db.max(-TOP_DB);
        }
    }
    power
}

fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    let n = samples.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    for i in 0..pad {
        out.push(samples[reflect_index(pad as isize - i as isize, n)]);
    }
    out.extend_from_slice(samples);
    for i in 0..pad {
        out.push(samples[reflect_index(n as isize - 2 - i as isize, n)]);
    }
    out
}

/// Mirror an index into `0..n` (reflection without repeating the edge sample).
fn reflect_index(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let mut i = i.rem_euclid(period);
    if i >= n as isize {
        i = period - i;
    }
    i as usize
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

fn build_mel_filters(fft_size: usize, sr: u32, n_mels: usize, fmin: f32, fmax: f32) -> Vec<Vec<f32>> {
    let n_freqs = fft_size / 2 + 1;
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);

    let hz_pts: Vec<f32> = (0..=(n_mels + 1))
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|k| k as f32 * sr as f32 / fft_size as f32)
        .collect();

    let mut filters = vec![vec![0f32; n_freqs]; n_mels];
    for (m, filter) in filters.iter_mut().enumerate() {
        let lower = hz_pts[m];
        let center = hz_pts[m + 1];
        let upper = hz_pts[m + 2];
        let down_denom = (center - lower).max(1e-10);
        let up_denom = (upper - center).max(1e-10);
        let enorm = 2.0 / (upper - lower).max(1e-10);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let w = if freq >= lower && freq <= center {
                (freq - lower) / down_denom
            } else if freq > center && freq <= upper {
                (upper - freq) / up_denom
            } else {
                0.0
            };
            filter[k] = w * enorm;
        }
    }
    filters
}

fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1_000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4_f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_centroid_tracks_tone() {
        let rate = 44100;
        let low = analyze(&sine(1000.0, rate, rate as usize), rate);
        let high = analyze(&sine(8000.0, rate, rate as usize), rate);
        assert!(low.has_energy && high.has_energy);
        assert!((low.centroid_hz - 1000.0).abs() < 150.0, "got {}", low.centroid_hz);
        assert!((high.centroid_hz - 8000.0).abs() < 300.0, "got {}", high.centroid_hz);
    }

    #[test]
    fn test_silence_has_no_centroid() {
        let s = analyze(&vec![0.0; 22050], 22050);
        assert!(!s.has_energy);
        assert_eq!(s.centroid_hz, 0.0);
        assert!(s.mel_db.iter().flatten().all(|&v| v == -TOP_DB));
    }

    #[test]
    fn test_mel_matrix_shape_and_range() {
        let rate = 22050;
        let s = analyze(&sine(440.0, rate, rate as usize), rate);
        let expected_frames = 1 + rate as usize / HOP;
        assert_eq!(s.mel_db.len(), expected_frames);
        assert!(s.mel_db.iter().all(|row| row.len() == N_MELS));
        let max = s.mel_db.iter().flatten().copied().fold(f32::MIN, f32::max);
        assert!((max - 0.0).abs() < 1e-4);
        assert!(s.mel_db.iter().flatten().all(|&v| (-TOP_DB..=0.0).contains(&v)));
    }

    #[test]
    fn test_tiny_input_does_not_panic() {
        let s = analyze(&[0.1, -0.1, 0.2], 8000);
        assert_eq!(s.mel_db.len(), 1);
        assert!(s.has_energy);
    }

    #[test]
    fn test_reflect_index() {
        // samples [a b c d]: reflect(-1) = b, reflect(4) = c
        assert_eq!(reflect_index(-1, 4), 1);
        assert_eq!(reflect_index(4, 4), 2);
        assert_eq!(reflect_index(2, 4), 2);
        assert_eq!(reflect_index(5, 1), 0);
    }
}
