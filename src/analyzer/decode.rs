use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unrecognized container: {0}")]
    Unrecognized(String),
    #[error("No audio track found")]
    NoAudioTrack,
    #[error("No sample rate in audio track")]
    NoSampleRate,
    #[error("Decoder unavailable: {0}")]
    Codec(String),
    #[error("No decodable audio samples")]
    Empty,
    #[error("Non-finite sample in decoded stream")]
    NonFinite,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mono PCM decoded from the head of a file, normalized to [-1, 1].
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
    /// Side/Mid energy ratio of the first two channels over the decoded
    /// window. `None` for mono sources.
    pub ms_energy_ratio: Option<f64>,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }
}

/// Added to both energies so silence and pure mono stay finite.
const MS_ENERGY_FLOOR: f64 = 1e-18;

/// Decode at most `max_secs` seconds of audio at the file's native rate,
/// downmixed to mono by averaging channels.
///
/// Any NaN or infinite sample fails the whole decode with
/// [`DecodeError::NonFinite`].
pub fn load_audio(path: &Path, max_secs: u32) -> Result<DecodedAudio, DecodeError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Unrecognized(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.ok_or(DecodeError::NoSampleRate)?;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Codec(e.to_string()))?;

    let max_samples = sample_rate as usize * max_secs as usize;
    let mut samples: Vec<f32> = Vec::with_capacity(max_samples.min(1 << 22));
    let mut ms = MidSideEnergy::default();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                log::debug!("Error reading packet from {}: {}", path.display(), e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping undecodable packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => {
                log::debug!("Decoder failure in {}: {}", path.display(), e);
                break;
            }
        };

        let spec = *decoded.spec();
        let frame_channels = spec.channels.count().max(1);
        channels = frame_channels;

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        for frame in sample_buf.samples().chunks(frame_channels) {
            if samples.len() >= max_samples {
                break;
            }
            if frame.iter().any(|s| !s.is_finite()) {
                return Err(DecodeError::NonFinite);
            }
            if let [l, r, ..] = frame {
                ms.push(*l as f64, *r as f64);
            }
            let mono = frame.iter().sum::<f32>() / frame_channels as f32;
            samples.push(mono.clamp(-1.0, 1.0));
        }

        if samples.len() >= max_samples {
            break;
        }
    }

    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    log::debug!(
        "Decoded {} samples ({:.1}s) at {}Hz from {}",
        samples.len(),
        samples.len() as f64 / sample_rate as f64,
        sample_rate,
        path.display()
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
        ms_energy_ratio: ms.ratio(),
    })
}

/// Running Mid/Side energies: `M = (L+R)/2`, `S = (L-R)/2`.
#[derive(Debug, Default)]
struct MidSideEnergy {
    mid: f64,
    side: f64,
    frames: u64,
}

impl MidSideEnergy {
    fn push(&mut self, l: f64, r: f64) {
        let m = 0.5 * (l + r);
        let s = 0.5 * (l - r);
        self.mid += m * m;
        self.side += s * s;
        self.frames += 1;
    }

    /// `E[S²] / E[M²]`. Near 0 for duplicated mono, large for antiphase.
    fn ratio(&self) -> Option<f64> {
        if self.frames == 0 {
            return None;
        }
        let n = self.frames as f64;
        Some((self.side / n + MS_ENERGY_FLOOR) / (self.mid / n + MS_ENERGY_FLOOR))
    }
}
