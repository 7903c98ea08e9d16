pub mod ollama;

use crate::analyzer::FeatureVector;
use crate::config::{ArbitrationZone, LlmConfig};
use crate::scoring::ScoreResult;
use std::sync::Arc;
use thiserror::Error;

pub use ollama::OllamaClient;

/// Verdict text used whenever the endpoint cannot produce one.
pub const FALLBACK_VERDICT: &str = "arbitration unavailable";

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Transport(String),
    #[error("Endpoint returned status {0}")]
    Status(u16),
    #[error("Malformed response: {0}")]
    Parse(String),
}

/// A text-generation endpoint: one prompt in, one completion out.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Decides whether a score is ambiguous and, if so, asks for a verdict.
///
/// Stateless across calls: one best-effort request per ambiguous file, no retries.
#[derive(Clone)]
pub struct ArbitrationGate {
    zone: ArbitrationZone,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl ArbitrationGate {
    pub fn new(zone: ArbitrationZone, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            zone,
            generator: Some(generator),
        }
    }

    /// A gate that never calls out. Ambiguous scores get the fallback text.
    pub fn disabled(zone: ArbitrationZone) -> Self {
        Self {
            zone,
            generator: None,
        }
    }

    /// HTTP-backed gate, or a disabled one when `llm.enabled` is off or `offline` is set.
    pub fn from_config(llm: &LlmConfig, offline: bool) -> Self {
        if llm.enabled && !offline {
            Self::new(llm.arbitration_zone, Arc::new(OllamaClient::new(llm)))
        } else {
            log::info!("Arbitration disabled, ambiguous scores get the fallback verdict");
            Self::disabled(llm.arbitration_zone)
        }
    }

    pub fn zone(&self) -> ArbitrationZone {
        self.zone
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    /// Whether a score falls inside the (inclusive) ambiguous zone.
    pub fn should_arbitrate(&self, score: &ScoreResult) -> bool {
        !score.defective && self.zone.contains(score.suspicion_score)
    }

    /// `None` when the score is outside the zone (no network call).
    /// Inside the zone, the endpoint's text or [`FALLBACK_VERDICT`].
    pub fn maybe_arbitrate(&self, score: &ScoreResult, features: &FeatureVector) -> Option<String> {
        if !self.should_arbitrate(score) {
            return None;
        }

        let generator = match &self.generator {
            Some(g) => g,
            None => return Some(FALLBACK_VERDICT.to_string()),
        };

        let prompt = build_prompt(features, score.suspicion_score);
        log::info!(
            "{}: score {:.2} in arbitration zone, requesting verdict",
            features.filename,
            score.suspicion_score
        );

        match generator.generate(&prompt) {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                log::warn!("{}: endpoint returned an empty verdict", features.filename);
                Some(FALLBACK_VERDICT.to_string())
            }
            Err(e) => {
                log::warn!("{}: arbitration failed: {}", features.filename, e);
                Some(FALLBACK_VERDICT.to_string())
            }
        }
    }
}

/// Natural-language prompt asking for a short diagnostic.
pub fn build_prompt(features: &FeatureVector, score: f64) -> String {
    let mut prompt = format!(
        "You are an audio engineering expert auditing a file for defects and inauthentic quality.\n\
         - File: {}\n\
         - Suspicion score: {:.2} / 1.0\n\
         - Clipping ratio: {:.4}\n\
         - Crackling ratio: {:.4}\n\
         - Spectral centroid: {:.0} Hz (fake-HQ signature: {})\n\
         - SNR: {:.1} dB\n",
        features.filename,
        score,
        features.clipping_ratio,
        features.crackling_ratio,
        features.spectral_centroid_hz,
        if features.fake_hq { "yes" } else { "no" },
        features.snr_db,
    );
    if let Some(kbps) = features.container.bitrate_kbps {
        prompt.push_str(&format!("- Declared bitrate: {kbps} kbps\n"));
    }
    if let Some(ratio) = features.ms_energy_ratio {
        prompt.push_str(&format!("- Stereo side/mid energy ratio: {ratio:.4}\n"));
    }
    if let Some(reason) = &features.container.spoof_reason {
        prompt.push_str(&format!("- Container integrity: SPOOFED ({reason})\n"));
    }
    prompt.push_str("Give a short verdict (two sentences at most) on the real quality of this file.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::metadata::ContainerInfo;
    use crate::analyzer::FeatureStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; answers with a fixed result.
    struct CountingGenerator {
        calls: AtomicUsize,
        reply: Result<String, u16>,
    }

    impl CountingGenerator {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), reply: Ok(text.to_string()) })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), reply: Err(status) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TextGenerator for CountingGenerator {
        fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(t) => Ok(t.clone()),
                Err(code) => Err(LlmError::Status(*code)),
            }
        }
    }

    fn fixture() -> FeatureVector {
        FeatureVector {
            content_hash: crate::analyzer::hash::hash_reader(&b"gate"[..]).unwrap(),
            filename: "take_03.flac".to_string(),
            status: FeatureStatus::Ok,
            clipping_ratio: 0.0123,
            crackling_ratio: 0.0,
            spectral_centroid_hz: 12000.0,
            fake_hq: true,
            snr_db: 18.0,
            spectrogram: Vec::new(),
            defect_timestamps_sec: Vec::new(),
            sample_rate: 44100,
            channels: 2,
            analyzed_secs: 45.0,
            ms_energy_ratio: None,
            container: ContainerInfo { bitrate_kbps: Some(1411), ..Default::default() },
        }
    }

    fn scored(features: &FeatureVector, value: f64) -> ScoreResult {
        ScoreResult {
            content_hash: features.content_hash,
            suspicion_score: value,
            quality_score: 90.0,
            defective: false,
            arbitration_text: None,
        }
    }

    fn zone() -> ArbitrationZone {
        ArbitrationZone { min_score: 0.4, max_score: 0.75 }
    }

    #[test]
    fn test_bounds_inclusive() {
        let f = fixture();
        let generator = CountingGenerator::ok("Looks upsampled.");
        let gate = ArbitrationGate::new(zone(), generator.clone());

        assert_eq!(gate.maybe_arbitrate(&scored(&f, 0.4), &f).as_deref(), Some("Looks upsampled."));
        assert_eq!(gate.maybe_arbitrate(&scored(&f, 0.75), &f).as_deref(), Some("Looks upsampled."));
        assert_eq!(generator.calls(), 2);
    }

    #[test]
    fn test_outside_zone_makes_no_call() {
        let f = fixture();
        let generator = CountingGenerator::ok("unused");
        let gate = ArbitrationGate::new(zone(), generator.clone());

        assert!(gate.maybe_arbitrate(&scored(&f, 0.3999), &f).is_none());
        assert!(gate.maybe_arbitrate(&scored(&f, 0.7501), &f).is_none());
        assert!(gate.maybe_arbitrate(&scored(&f, 0.0), &f).is_none());
        assert!(gate.maybe_arbitrate(&scored(&f, 1.0), &f).is_none());
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn test_defective_never_calls_even_inside_zone() {
        let mut f = fixture();
        f.status = FeatureStatus::Defective { reason: "empty file (0 bytes)".to_string() };
        let generator = CountingGenerator::ok("unused");
        // Zone covering everything, including the defective score of 1.0
        let gate = ArbitrationGate::new(ArbitrationZone { min_score: 0.0, max_score: 1.0 }, generator.clone());

        let s = crate::scoring::score(&f, &crate::config::Weights::default(), 20.0);
        assert_eq!(s.suspicion_score, 1.0);
        assert!(gate.maybe_arbitrate(&s, &f).is_none());
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn test_failure_degrades_to_fallback() {
        let f = fixture();
        let generator = CountingGenerator::failing(503);
        let gate = ArbitrationGate::new(zone(), generator.clone());

        let s = scored(&f, 0.55);
        assert_eq!(gate.maybe_arbitrate(&s, &f).as_deref(), Some(FALLBACK_VERDICT));
        assert_eq!(generator.calls(), 1, "single attempt, no retry");
        assert_eq!(s.suspicion_score, 0.55);
    }

    #[test]
    fn test_blank_reply_degrades_to_fallback() {
        let f = fixture();
        let gate = ArbitrationGate::new(zone(), CountingGenerator::ok("   \n"));
        assert_eq!(gate.maybe_arbitrate(&scored(&f, 0.5), &f).as_deref(), Some(FALLBACK_VERDICT));
    }

    #[test]
    fn test_disabled_gate() {
        let f = fixture();
        let gate = ArbitrationGate::disabled(zone());
        assert_eq!(gate.maybe_arbitrate(&scored(&f, 0.5), &f).as_deref(), Some(FALLBACK_VERDICT));
        assert!(gate.maybe_arbitrate(&scored(&f, 0.1), &f).is_none());
    }

    #[test]
    fn test_from_config_respects_switches() {
        let mut llm = LlmConfig::default();
        assert!(ArbitrationGate::from_config(&llm, false).is_enabled());
        assert!(!ArbitrationGate::from_config(&llm, true).is_enabled());
        llm.enabled = false;
        let gate = ArbitrationGate::from_config(&llm, false);
        assert!(!gate.is_enabled());
        assert_eq!(gate.zone(), llm.arbitration_zone);
    }

    #[test]
    fn test_prompt_contents() {
        let f = fixture();
        let prompt = build_prompt(&f, 0.55);
        assert!(prompt.contains("take_03.flac"));
        assert!(prompt.contains("0.55"));
        assert!(prompt.contains("0.0123"));
        assert!(prompt.contains("1411 kbps"));
        assert!(!prompt.contains("side/mid"));
        assert!(!prompt.contains("SPOOFED"));
    }

    #[test]
    fn test_prompt_reports_stereo_and_spoofing() {
        let mut f = fixture();
        f.ms_energy_ratio = Some(0.0002);
        f.container.spoof_reason = Some("named .flac but the container is Mpeg".to_string());
        let prompt = build_prompt(&f, 0.6);
        assert!(prompt.contains("side/mid energy ratio: 0.0002"));
        assert!(prompt.contains("SPOOFED (named .flac but the container is Mpeg)"));
    }
}
