use crate::config::AudioConfig;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub struct ScanResult {
    pub files: Vec<PathBuf>,
    /// Files under a scanned directory whose suffix is not accepted.
    pub skipped: u64,
}

/// Expand CLI path arguments into files to submit.
///
/// Directories are walked recursively and filtered by `audio.extensions`.
/// Anything else is passed through untouched, so a missing or unreadable path
/// still reaches the dispatcher and is reported as a task failure.
pub fn collect_audio_files(paths: &[PathBuf], audio: &AudioConfig) -> ScanResult {
    let mut result = ScanResult {
        files: Vec::new(),
        skipped: 0,
    };

    for path in paths {
        if path.is_dir() {
            walk_dir(path, audio, &mut result);
        } else {
            if path.is_file() && !audio.accepts(path) {
                log::warn!("{}: suffix not in audio.extensions, analyzing anyway", path.display());
            }
            result.files.push(path.clone());
        }
    }

    log::info!(
        "Found {} files ({} skipped by extension)",
        result.files.len(),
        result.skipped
    );
    result
}

fn walk_dir(root: &Path, audio: &AudioConfig, result: &mut ScanResult) {
    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                log::warn!("Skipping unreadable entry under {}: {}", root.display(), err);
                None
            }
        })
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if audio.accepts(entry.path()) {
            result.files.push(entry.into_path());
        } else {
            result.skipped += 1;
        }
    }
}
