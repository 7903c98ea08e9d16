use lofty::file::FileType;
use lofty::prelude::*;
use lofty::file::TaggedFile;
use lofty::probe::Probe;
use std::path::Path;

/// Declared bitrate below which a FLAC is treated as a lossy transcode.
pub const FLAC_MIN_BITRATE_KBPS: u32 = 128;

/// Container-level properties declared by the file itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    /// Format detected from the file's content, not its name.
    pub file_type: Option<String>,
    /// Declared audio bitrate in kbps.
    pub bitrate_kbps: Option<u32>,
    pub duration_secs: Option<f64>,
    pub artist: Option<String>,
    pub title: Option<String>,
    /// Why the container looks spoofed, if it does.
    pub spoof_reason: Option<String>,
}

impl ContainerInfo {
    pub fn is_spoofed(&self) -> bool {
        self.spoof_reason.is_some()
    }
}

/// Read declared properties. Returns empty info on failure (unknown containers, corrupt headers).
pub fn read_container_info(path: &Path) -> ContainerInfo {
    let tagged_file = match read_tagged(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read properties from {}: {}", path.display(), e);
            return ContainerInfo::default();
        }
    };

    let props = tagged_file.properties();
    let secs = props.duration().as_secs_f64();
    let duration_secs = if secs > 0.0 { Some(secs) } else { None };
    let bitrate_kbps = props.audio_bitrate().or_else(|| props.overall_bitrate());
    let file_type = tagged_file.file_type();

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let spoof_reason = integrity_check(&extension, file_type, bitrate_kbps);
    if let Some(reason) = &spoof_reason {
        log::warn!("{}: {}", path.display(), reason);
    }

    ContainerInfo {
        file_type: Some(format!("{:?}", file_type)),
        bitrate_kbps,
        duration_secs,
        artist: tag.and_then(|t| t.artist().map(|s| s.to_string())),
        title: tag.and_then(|t| t.title().map(|s| s.to_string())),
        spoof_reason,
    }
}

// Sniff the content so a renamed file is read as what it really is
fn read_tagged(path: &Path) -> lofty::error::Result<TaggedFile> {
    Probe::open(path)?.guess_file_type()?.read()
}

/// Anti-spoofing heuristics on the declared container.
///
/// A `.flac` whose content is another format, or whose declared bitrate is
/// under [`FLAC_MIN_BITRATE_KBPS`], is flagged. Other suffixes are not judged.
pub fn integrity_check(extension: &str, file_type: FileType, bitrate_kbps: Option<u32>) -> Option<String> {
    if !extension.eq_ignore_ascii_case("flac") {
        return None;
    }
    if file_type != FileType::Flac {
        return Some(format!("named .flac but the container is {:?}", file_type));
    }
    match bitrate_kbps {
        Some(kbps) if kbps > 0 && kbps < FLAC_MIN_BITRATE_KBPS => Some(format!(
            "declared bitrate {kbps} kbps is implausibly low for FLAC"
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..8000 {
            w.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn test_flac_container_mismatch() {
        assert!(integrity_check("flac", FileType::Mpeg, Some(320)).is_some());
        assert!(integrity_check("FLAC", FileType::Wav, None).is_some());
        assert!(integrity_check("flac", FileType::Flac, Some(900)).is_none());
    }

    #[test]
    fn test_flac_low_bitrate() {
        let reason = integrity_check("flac", FileType::Flac, Some(96)).unwrap();
        assert!(reason.contains("96 kbps"));
        assert!(integrity_check("flac", FileType::Flac, Some(128)).is_none());
        // Unknown bitrate is not evidence
        assert!(integrity_check("flac", FileType::Flac, Some(0)).is_none());
        assert!(integrity_check("flac", FileType::Flac, None).is_none());
    }

    #[test]
    fn test_other_suffixes_not_judged() {
        assert!(integrity_check("mp3", FileType::Mpeg, Some(64)).is_none());
        assert!(integrity_check("wav", FileType::Flac, None).is_none());
    }

    #[test]
    fn test_renamed_wav_is_spoofed() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("hires.flac");
        write_wav(&fake);

        let info = read_container_info(&fake);
        assert_eq!(info.file_type.as_deref(), Some("Wav"));
        assert!(info.is_spoofed());
    }

    #[test]
    fn test_honest_wav_is_not_spoofed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_wav(&path);

        let info = read_container_info(&path);
        assert_eq!(info.file_type.as_deref(), Some("Wav"));
        assert!(!info.is_spoofed());
    }
}
