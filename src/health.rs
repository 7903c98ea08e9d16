//! One-shot reachability check against the text-generation endpoint.

use crate::config::LlmConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Listing response (partial: only model names are read).
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

pub struct HealthReport {
    pub listing_url: String,
    pub models: Vec<String>,
}

impl HealthReport {
    pub fn has_model(&self, name: &str) -> bool {
        self.models
            .iter()
            .any(|m| m == name || m.split(':').next() == Some(name))
    }
}

/// Derive the model-listing URL from the generate URL:
/// `http://host:11434/api/generate` → `http://host:11434/api/tags`.
pub fn listing_url(api_url: &str) -> String {
    if let Some(idx) = api_url.find("/api/") {
        format!("{}/api/tags", &api_url[..idx])
    } else {
        format!("{}/api/tags", api_url.trim_end_matches('/'))
    }
}

/// GET the listing path. Any transport failure or non-2xx status is an error.
pub fn check_endpoint(config: &LlmConfig) -> Result<HealthReport> {
    let url = listing_url(&config.api_url);
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(HEALTH_TIMEOUT))
        .build()
        .into();

    let tags: TagsResponse = agent
        .get(&url)
        .call()
        .with_context(|| format!("Text-generation endpoint unreachable at {url}"))?
        .body_mut()
        .read_json()
        .with_context(|| format!("Failed to parse model listing from {url}"))?;

    let models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
    let report = HealthReport {
        listing_url: url,
        models,
    };

    if !report.has_model(&config.model_name) {
        log::warn!(
            "Model {} not listed by {} ({} models available)",
            config.model_name,
            report.listing_url,
            report.models.len()
        );
    }
    Ok(report)
}
