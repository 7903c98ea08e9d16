//! Time-domain integrity signals over the decoded (mono, [-1, 1]) window.

/// Guard added to the SNR denominator so silence never divides by zero.
pub const SNR_EPSILON: f64 = 1e-6;

/// SNR reported for a flat waveform (std below ε): no measurable noise.
pub const SNR_CEILING_DB: f64 = 120.0;

/// Lower clamp for SNR.
pub const SNR_FLOOR_DB: f64 = -120.0;

/// RMS frame length and hop, in samples.
const RMS_FRAME: usize = 2048;
const RMS_HOP: usize = 512;

/// Maximum number of defect timestamps reported per file.
const MAX_DEFECT_TIMESTAMPS: usize = 10;

/// Fraction of samples whose magnitude is at or above `1 - sensitivity`.
///
/// The threshold is compared in sample precision, so a sample stored as
/// exactly `0.95f32` counts at sensitivity 0.05.
pub fn clipping_ratio(samples: &[f32], sensitivity: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let threshold = (1.0 - sensitivity) as f32;
    let clipped = samples.iter().filter(|s| s.abs() >= threshold).count();
    clipped as f64 / samples.len() as f64
}

/// Fraction of sample-to-sample deltas whose magnitude exceeds `threshold`.
pub fn crackling_ratio(samples: &[f32], threshold: f64) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let threshold = threshold as f32;
    let jumps = samples
        .windows(2)
        .filter(|w| (w[1] - w[0]).abs() > threshold)
        .count();
    jumps as f64 / (samples.len() - 1) as f64
}

/// Per-frame RMS (2048-sample frames, 512 hop). Short inputs yield one frame.
pub fn frame_rms(samples: &[f32]) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    if samples.len() <= RMS_FRAME {
        return vec![rms(samples)];
    }
    let mut out = Vec::with_capacity((samples.len() - RMS_FRAME) / RMS_HOP + 1);
    let mut start = 0;
    while start + RMS_FRAME <= samples.len() {
        out.push(rms(&samples[start..start + RMS_FRAME]));
        start += RMS_HOP;
    }
    out
}

fn rms(frame: &[f32]) -> f64 {
    let sum_sq: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / frame.len() as f64).sqrt()
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f32]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean: f64 = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var: f64 = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

/// `20·log10(mean(frame_rms) / (std(waveform) + ε))`.
///
/// A flat waveform (std < ε, silence included) reports [`SNR_CEILING_DB`].
/// Everything else is clamped to [`SNR_FLOOR_DB`, `SNR_CEILING_DB`].
pub fn snr_db(samples: &[f32]) -> f64 {
    let (_, std) = mean_std(samples);
    if std < SNR_EPSILON {
        return SNR_CEILING_DB;
    }

    let frames = frame_rms(samples);
    let mean_rms = frames.iter().sum::<f64>() / frames.len().max(1) as f64;
    let ratio = mean_rms / (std + SNR_EPSILON);
    if ratio <= 0.0 || !ratio.is_finite() {
        return SNR_FLOOR_DB;
    }

    (20.0 * ratio.log10()).clamp(SNR_FLOOR_DB, SNR_CEILING_DB)
}

/// First sample-jump outliers (`|Δx| > 5·std(Δx)`), as seconds, ascending.
pub fn defect_timestamps(samples: &[f32], sample_rate: u32) -> Vec<f64> {
    if samples.len() < 2 || sample_rate == 0 {
        return Vec::new();
    }
    let diffs: Vec<f32> = samples.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let (_, std) = mean_std(&diffs);
    if std < SNR_EPSILON {
        return Vec::new();
    }
    let threshold = 5.0 * std;

    diffs
        .iter()
        .enumerate()
        .filter(|(_, d)| (**d as f64) > threshold)
        .take(MAX_DEFECT_TIMESTAMPS)
        .map(|(i, _)| i as f64 / sample_rate as f64)
        .collect()
}
