use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration loaded from a TOML config file.
/// All fields have defaults, so the default config file is optional.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    pub audio: AudioConfig,
    pub ml_engine: MlEngineConfig,
    pub performance: PerformanceConfig,
    pub llm: LlmConfig,
}

/// Decoding window, accepted suffixes and detector thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Seconds of audio decoded per file (hashing always covers the whole file).
    pub sample_duration_sec: u32,
    /// Accepted file suffixes, with or without the leading dot.
    pub extensions: Vec<String>,
    pub analysis_params: AnalysisParams,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_duration_sec: 45,
            extensions: [".flac", ".wav", ".alac", ".mp3", ".m4a"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            analysis_params: AnalysisParams::default(),
        }
    }
}

impl AudioConfig {
    /// Whether a path carries one of the configured suffixes (case-insensitive).
    pub fn accepts(&self, path: &Path) -> bool {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_lowercase(),
            None => return false,
        };
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    /// Spectral centroid below this (kHz) flags a fake-HQ signature.
    pub fake_hq_threshold_khz: f64,
    /// Samples at or above `1 - clipping_sensitivity` count as clipped.
    pub clipping_sensitivity: f64,
    /// SNR below this floor adds suspicion.
    pub snr_min_db: f64,
    /// Sample-to-sample jump (normalized waveform) counted as a crackle.
    pub crackling_threshold: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            fake_hq_threshold_khz: 16.5,
            clipping_sensitivity: 0.05,
            snr_min_db: 20.0,
            crackling_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MlEngineConfig {
    pub initial_weights: Weights,
}

/// Linear fusion weights. Their sum is not required to be 1; the fused score is clamped.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct Weights {
    pub spectral_cut: f64,
    pub clipping: f64,
    pub snr: f64,
    pub crackling: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            spectral_cut: 0.5,
            clipping: 0.2,
            snr: 0.2,
            crackling: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Worker pool size. 0 = auto-detect (cores / 2, min 1).
    pub max_threads: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { max_threads: 4 }
    }
}

/// Text-generation endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Set to false to never contact the endpoint (no health check, no arbitration).
    pub enabled: bool,
    pub model_name: String,
    pub api_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub arbitration_zone: ArbitrationZone,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_name: "qwen2.5".to_string(),
            api_url: "http://localhost:11434/api/generate".to_string(),
            timeout_secs: 15,
            arbitration_zone: ArbitrationZone::default(),
        }
    }
}

/// Inclusive score interval in which arbitration is requested.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArbitrationZone {
    pub min_score: f64,
    pub max_score: f64,
}

impl Default for ArbitrationZone {
    fn default() -> Self {
        Self {
            min_score: 0.4,
            max_score: 0.75,
        }
    }
}

impl ArbitrationZone {
    pub fn contains(&self, score: f64) -> bool {
        self.min_score <= score && score <= self.max_score
    }
}

impl AppConfig {
    /// Load config from an explicit path, or from `~/.config/audiotriage/config.toml`.
    ///
    /// A missing default file yields defaults. A missing explicit file, a parse
    /// error or a validation failure is an error: the caller treats it as fatal.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match Self::config_path() {
                Some(p) if p.exists() => p,
                _ => {
                    log::debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.clone(),
                source,
            },
            other => other,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zone = &self.llm.arbitration_zone;
        if !(0.0..=1.0).contains(&zone.min_score)
            || !(0.0..=1.0).contains(&zone.max_score)
            || zone.min_score > zone.max_score
        {
            return Err(ConfigError::Invalid(format!(
                "llm.arbitration_zone must satisfy 0 <= min_score <= max_score <= 1 (got {} .. {})",
                zone.min_score, zone.max_score
            )));
        }
        if self.audio.sample_duration_sec == 0 {
            return Err(ConfigError::Invalid(
                "audio.sample_duration_sec must be at least 1".to_string(),
            ));
        }
        let sens = self.audio.analysis_params.clipping_sensitivity;
        if !(sens > 0.0 && sens < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "audio.analysis_params.clipping_sensitivity must be in (0, 1) (got {sens})"
            )));
        }
        let w = &self.ml_engine.initial_weights;
        for (name, value) in [
            ("spectral_cut", w.spectral_cut),
            ("clipping", w.clipping),
            ("snr", w.snr),
            ("crackling", w.crackling),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "ml_engine.initial_weights.{name} must be a non-negative number (got {value})"
                )));
            }
        }
        Ok(())
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.performance.max_threads > 0 {
            self.performance.max_threads
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("audiotriage.db")
    } else {
        // Fallback: current directory
        PathBuf::from("audiotriage.db")
    }
}
