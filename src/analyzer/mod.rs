pub mod decode;
pub mod features;
pub mod hash;
pub mod metadata;
pub mod spectral;

use crate::config::AudioConfig;
use hash::ContentHash;
use metadata::ContainerInfo;
use std::path::Path;
use thiserror::Error;

/// Failure to read the input path at all. Content problems are not errors:
/// they come back as [`FeatureStatus::Defective`].
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureStatus {
    Ok,
    /// Zero-byte or undecodable input. No numeric feature is trusted.
    Defective { reason: String },
}

impl FeatureStatus {
    pub fn is_defective(&self) -> bool {
        matches!(self, Self::Defective { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Defective { .. } => "defective",
        }
    }
}

/// Everything measured once per file.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub content_hash: ContentHash,
    /// Display name only, never an identity key.
    pub filename: String,
    pub status: FeatureStatus,
    pub clipping_ratio: f64,
    pub crackling_ratio: f64,
    pub spectral_centroid_hz: f64,
    /// Centroid below the fake-HQ threshold on a window that carries energy.
    pub fake_hq: bool,
    pub snr_db: f64,
    /// Time × mel-band dB matrix, for display only.
    pub spectrogram: Vec<Vec<f32>>,
    pub defect_timestamps_sec: Vec<f64>,
    pub sample_rate: u32,
    pub channels: usize,
    pub analyzed_secs: f64,
    /// Side over mid energy of the first two channels. `None` for mono.
    pub ms_energy_ratio: Option<f64>,
    pub container: ContainerInfo,
}

impl FeatureVector {
    fn defective(content_hash: ContentHash, filename: String, reason: String) -> Self {
        Self {
            content_hash,
            filename,
            status: FeatureStatus::Defective { reason },
            clipping_ratio: 0.0,
            crackling_ratio: 0.0,
            spectral_centroid_hz: 0.0,
            fake_hq: false,
            snr_db: 0.0,
            spectrogram: Vec::new(),
            defect_timestamps_sec: Vec::new(),
            sample_rate: 0,
            channels: 0,
            analyzed_secs: 0.0,
            ms_energy_ratio: None,
            container: ContainerInfo::default(),
        }
    }
}

/// Classify, hash and measure one file.
///
/// The whole file is hashed; only the first `sample_duration_sec` seconds are
/// decoded. Zero-byte and undecodable inputs yield a defective vector rather
/// than an error.
pub fn extract(path: &Path, audio: &AudioConfig) -> Result<FeatureVector, ExtractError> {
    let unreadable = |source| ExtractError::Unreadable {
        path: path.display().to_string(),
        source,
    };

    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let size = std::fs::metadata(path).map_err(unreadable)?.len();
    let content_hash = hash::hash_file(path).map_err(unreadable)?;

    if size == 0 {
        log::warn!("{filename}: empty file");
        return Ok(FeatureVector::defective(content_hash, filename, "empty file (0 bytes)".to_string()));
    }

    let audio_data = match decode::load_audio(path, audio.sample_duration_sec) {
        Ok(a) => a,
        Err(e) => {
            log::warn!("{filename}: undecodable ({e})");
            return Ok(FeatureVector::defective(content_hash, filename, format!("undecodable: {e}")));
        }
    };

    let params = &audio.analysis_params;
    let samples = &audio_data.samples;

    let clipping_ratio = features::clipping_ratio(samples, params.clipping_sensitivity);
    let crackling_ratio = features::crackling_ratio(samples, params.crackling_threshold);
    let snr_db = features::snr_db(samples);
    let defect_timestamps_sec = features::defect_timestamps(samples, audio_data.sample_rate);

    let spectral = spectral::analyze(samples, audio_data.sample_rate);
    // A centroid from less than one full window is not evidence
    let fake_hq = spectral.has_energy
        && samples.len() >= spectral::N_FFT
        && spectral.centroid_hz < params.fake_hq_threshold_khz * 1000.0;

    log::debug!(
        "{filename}: clipping={clipping_ratio:.4} crackling={crackling_ratio:.4} \
         centroid={:.0}Hz snr={snr_db:.1}dB fake_hq={fake_hq}",
        spectral.centroid_hz
    );

    Ok(FeatureVector {
        content_hash,
        filename,
        status: FeatureStatus::Ok,
        clipping_ratio,
        crackling_ratio,
        spectral_centroid_hz: spectral.centroid_hz,
        fake_hq,
        snr_db,
        spectrogram: spectral.mel_db,
        defect_timestamps_sec,
        sample_rate: audio_data.sample_rate,
        channels: audio_data.channels,
        analyzed_secs: audio_data.duration_secs(),
        ms_energy_ratio: audio_data.ms_energy_ratio,
        container: metadata::read_container_info(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_mono_wav(path: &Path, rate: u32, samples: &[f32]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            w.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn test_zero_byte_is_defective() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.flac");
        std::fs::write(&path, b"").unwrap();

        let fv = extract(&path, &AudioConfig::default()).unwrap();
        assert!(fv.status.is_defective());
        assert_eq!(fv.filename, "empty.flac");
        assert_eq!(fv.content_hash, hash::hash_reader(std::io::empty()).unwrap());
    }

    #[test]
    fn test_corrupt_file_is_defective_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp3");
        std::fs::write(&path, vec![0x5Au8; 4096]).unwrap();

        let fv = extract(&path, &AudioConfig::default()).unwrap();
        match &fv.status {
            FeatureStatus::Defective { reason } => assert!(reason.starts_with("undecodable")),
            other => panic!("expected defective, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = extract(Path::new("/nonexistent/take1.wav"), &AudioConfig::default()).unwrap_err();
        assert!(matches!(err, ExtractError::Unreadable { .. }));
    }

    #[test]
    fn test_silence_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        write_mono_wav(&path, 22050, &vec![0.0; 22050]);

        let fv = extract(&path, &AudioConfig::default()).unwrap();
        assert_eq!(fv.status, FeatureStatus::Ok);
        assert_eq!(fv.clipping_ratio, 0.0);
        assert_eq!(fv.crackling_ratio, 0.0);
        assert_eq!(fv.snr_db, features::SNR_CEILING_DB);
        assert!(!fv.fake_hq);
        assert_eq!(fv.sample_rate, 22050);
        assert!((fv.analyzed_secs - 1.0).abs() < 1e-9);
        assert!(!fv.spectrogram.is_empty());
    }

    #[test]
    fn test_hard_clipped_tone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clipped.wav");
        let rate = 22050;
        let samples: Vec<f32> = (0..rate)
            .map(|i| {
                let v = 3.0 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / rate as f32).sin();
                v.clamp(-1.0, 1.0)
            })
            .collect();
        write_mono_wav(&path, rate as u32, &samples);

        let fv = extract(&path, &AudioConfig::default()).unwrap();
        assert!(fv.clipping_ratio > 0.5, "got {}", fv.clipping_ratio);
        assert!(fv.clipping_ratio <= 1.0);
        assert!(fv.fake_hq, "a 220 Hz tone sits far below 16.5 kHz");
    }

    #[test]
    fn test_nan_stream_is_defective() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nan.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut w = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..4000 {
            w.write_sample(if i == 100 { f32::NAN } else { 0.1f32 }).unwrap();
        }
        w.finalize().unwrap();

        let fv = extract(&path, &AudioConfig::default()).unwrap();
        match &fv.status {
            FeatureStatus::Defective { reason } => {
                assert!(reason.starts_with("undecodable"));
                assert!(reason.contains("Non-finite"), "got {reason}");
            }
            other => panic!("expected defective, got {other:?}"),
        }
        let s = crate::scoring::score(&fv, &Default::default(), 20.0);
        assert_eq!(s.suspicion_score, 1.0);
    }

    #[test]
    fn test_single_sample_is_not_fake_hq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blip.wav");
        write_mono_wav(&path, 44100, &[0.5]);

        let fv = extract(&path, &AudioConfig::default()).unwrap();
        assert_eq!(fv.status, FeatureStatus::Ok);
        assert!(!fv.fake_hq);
        let s = crate::scoring::score(&fv, &Default::default(), 20.0);
        assert!(s.suspicion_score < 0.4, "got {}", s.suspicion_score);
    }

    #[test]
    fn test_stereo_ratio_reaches_features() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..8000 {
            let v = (3000.0 * (2.0 * std::f32::consts::PI * 300.0 * i as f32 / 8000.0).sin()) as i16;
            w.write_sample(v).unwrap();
            w.write_sample(-v).unwrap();
        }
        w.finalize().unwrap();

        let fv = extract(&path, &AudioConfig::default()).unwrap();
        assert_eq!(fv.channels, 2);
        assert!(fv.ms_energy_ratio.unwrap() > 1e6);
    }

    #[test]
    fn test_hash_covers_bytes_beyond_decode_window() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        let rate = 8000u32;
        let mut tone: Vec<f32> = (0..rate * 3)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 300.0 * i as f32 / rate as f32).sin())
            .collect();
        write_mono_wav(&a, rate, &tone);
        // Differ only in the last second, outside a 1-second decode window
        *tone.last_mut().unwrap() = -0.9;
        write_mono_wav(&b, rate, &tone);

        let mut audio = AudioConfig::default();
        audio.sample_duration_sec = 1;
        let fa = extract(&a, &audio).unwrap();
        let fb = extract(&b, &audio).unwrap();
        assert_ne!(fa.content_hash, fb.content_hash);
        assert_eq!(fa.clipping_ratio, fb.clipping_ratio);
    }
}
