use crate::error::{EngineError, Result};
use context_assembly::{AssemblyConfig, CompressionConfig, SelectorConfig};
use context_search::{
    AuthorityConfig, DedupConfig, DiversityConfig, ExpansionConfig, FanoutConfig,
    FreshnessConfig, QualityConfig, RerankConfig, ThresholdConfig,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming a config file for binaries.
pub const CONFIG_ENV: &str = "CONTEXT_FUSION_CONFIG";

/// Engine-wide defaults, one section per pipeline stage. Every section is
/// optional in a config file; unknown top-level keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub expansion: ExpansionConfig,
    pub fanout: FanoutConfig,
    pub dedup: DedupConfig,
    pub quality: QualityConfig,
    pub authority: AuthorityConfig,
    pub freshness: FreshnessConfig,
    pub threshold: ThresholdConfig,
    pub rerank: RerankConfig,
    pub diversity: DiversityConfig,
    pub selector: SelectorConfig,
    pub compression: CompressionConfig,
    pub assembly: AssemblyConfig,
}

impl EngineConfig {
    /// Load and validate a JSON or TOML config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|err| EngineError::Config(format!("{}: {err}", path.display())))?;
        let config = Self::from_slice(&bytes)
            .map_err(|err| EngineError::Config(format!("{}: {err}", path.display())))?;
        log::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Parse JSON first, then TOML.
    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, String> {
        let value: serde_json::Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(json_err) => {
                let utf8 = std::str::from_utf8(bytes).map_err(|err| format!("{json_err}; {err}"))?;
                let toml_value: toml::Value = toml::from_str(utf8).map_err(|toml_err| {
                    format!("config is not valid JSON or TOML ({json_err}); TOML parse error: {toml_err}")
                })?;
                serde_json::to_value(toml_value)
                    .map_err(|err| format!("failed to convert TOML config to JSON: {err}"))?
            }
        };
        let config: Self =
            serde_json::from_value(value).map_err(|err| format!("config parse error: {err}"))?;
        config.validate().map_err(|err| err.to_string())?;
        Ok(config)
    }

    /// `CONTEXT_FUSION_CONFIG` when set, defaults otherwise.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_path(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.threshold.validate()?;
        self.rerank.weights.validate()?;
        self.diversity.validate()?;
        self.selector.validate()?;
        self.compression.validate()?;

        let dedup = &self.dedup;
        for (name, value) in [
            ("dedup.similarity_threshold", dedup.similarity_threshold),
            ("dedup.exact_confirm", dedup.exact_confirm),
            ("dedup.near_threshold", dedup.near_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if dedup.similarity_threshold > dedup.near_threshold {
            return Err(EngineError::Config(format!(
                "dedup.similarity_threshold ({}) must not exceed dedup.near_threshold ({})",
                dedup.similarity_threshold, dedup.near_threshold
            )));
        }
        if dedup.char_weight < 0.0 || dedup.word_weight < 0.0 || dedup.char_weight + dedup.word_weight <= 0.0 {
            return Err(EngineError::Config(
                "dedup.char_weight and dedup.word_weight must be non-negative with a positive sum"
                    .to_string(),
            ));
        }
        if self.fanout.top_k == 0 || self.fanout.timeout_ms == 0 {
            return Err(EngineError::Config(
                "fanout.top_k and fanout.timeout_ms must be positive".to_string(),
            ));
        }
        if self.quality.min_length > self.quality.max_length {
            return Err(EngineError::Config(format!(
                "quality.min_length ({}) exceeds quality.max_length ({})",
                self.quality.min_length, self.quality.max_length
            )));
        }
        if !(0.0..=1.0).contains(&self.assembly.hybrid_weight) {
            return Err(EngineError::Config(format!(
                "assembly.hybrid_weight must be within [0, 1], got {}",
                self.assembly.hybrid_weight
            )));
        }
        Ok(())
    }
}
