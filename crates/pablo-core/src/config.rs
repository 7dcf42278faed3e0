//! # Configuration
//!
//! `PabloConfig` is read from TOML. Every section and field has a default, so
//! an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [engine]
//! iteration_cap = 16
//! slack_budget = 64
//! phase_time_budget_ms = 250
//!
//! [retrieval]
//! dims = 64
//! nprobe = 4
//!
//! [codec]
//! compression = "zstd"
//! zstd_level = 3
//!
//! [paths]
//! vocab_dir = "data/vocab"
//! rules_dir = "rules"
//! store_path = "data/retain.redb"
//! ```

use crate::codec::{Compression, EncodeOptions};
use crate::primitives::{DEFAULT_ITERATION_CAP, DEFAULT_SLACK_BUDGET, THUMBNAIL_DIMS};
use crate::rules::EngineConfig;
use crate::types::PabloError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PabloConfig {
    pub engine: EngineSection,
    pub retrieval: RetrievalConfig,
    pub codec: CodecConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub iteration_cap: u32,
    pub slack_budget: u32,
    pub phase_time_budget_ms: Option<u64>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            iteration_cap: DEFAULT_ITERATION_CAP,
            slack_budget: DEFAULT_SLACK_BUDGET,
            phase_time_budget_ms: None,
        }
    }
}

/// Retrieval index tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Thumbnail length: 64 or 128.
    pub dims: usize,
    /// Partitions probed per query. Higher is slower and more accurate.
    pub nprobe: usize,
    /// Pending inserts that trigger a merge.
    pub merge_batch: usize,
    /// Pending inserts past which queries fall back to a linear scan.
    pub stale_after: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dims: THUMBNAIL_DIMS[0],
            nprobe: 4,
            merge_batch: 256,
            stale_after: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    pub compression: Compression,
    pub zstd_level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        let options = EncodeOptions::default();
        Self {
            compression: options.compression,
            zstd_level: options.zstd_level,
        }
    }
}

impl CodecConfig {
    #[must_use]
    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            compression: self.compression,
            zstd_level: self.zstd_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub vocab_dir: Option<PathBuf>,
    pub rules_dir: Option<PathBuf>,
    pub store_path: Option<PathBuf>,
}

impl PabloConfig {
    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, PabloError> {
        let config: Self = toml::from_str(text).map_err(|e| PabloError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PabloError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| PabloError::Io(e.to_string()))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), PabloError> {
        if !THUMBNAIL_DIMS.contains(&self.retrieval.dims) {
            return Err(PabloError::Config(format!(
                "retrieval.dims must be one of {:?}, got {}",
                THUMBNAIL_DIMS, self.retrieval.dims
            )));
        }
        if self.retrieval.nprobe == 0 || self.retrieval.merge_batch == 0 {
            return Err(PabloError::Config(
                "retrieval.nprobe and retrieval.merge_batch must be positive".to_string(),
            ));
        }
        if self.engine.iteration_cap == 0 {
            return Err(PabloError::Config(
                "engine.iteration_cap must be positive".to_string(),
            ));
        }
        if !zstd::compression_level_range().contains(&self.codec.zstd_level) {
            return Err(PabloError::Config(format!(
                "codec.zstd_level {} is out of range",
                self.codec.zstd_level
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            iteration_cap: self.engine.iteration_cap,
            slack_budget: self.engine.slack_budget,
            phase_time_budget: self.engine.phase_time_budget_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_default() {
        let config = PabloConfig::from_toml_str("").expect("empty");
        assert_eq!(config, PabloConfig::default());
        assert_eq!(config.engine_config(), EngineConfig::default());
        assert_eq!(config.codec.encode_options(), EncodeOptions::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = PabloConfig::from_toml_str(
            r#"
[engine]
phase_time_budget_ms = 250

[retrieval]
dims = 128

[codec]
compression = "zstd"
zstd_level = 9

[paths]
rules_dir = "rules"
"#,
        )
        .expect("parse");
        assert_eq!(config.engine.iteration_cap, DEFAULT_ITERATION_CAP);
        assert_eq!(
            config.engine_config().phase_time_budget,
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.retrieval.dims, 128);
        assert_eq!(config.retrieval.nprobe, 4);
        assert_eq!(config.codec.encode_options(), EncodeOptions::zstd(9));
        assert_eq!(config.paths.rules_dir, Some(PathBuf::from("rules")));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for text in [
            "[retrieval]\ndims = 100",
            "[engine]\niteration_cap = 0",
            "[codec]\nzstd_level = 99",
            "[codec]\ncompression = \"lz4\"",
            "[nonsense]\nx = 1",
        ] {
            assert!(
                matches!(PabloConfig::from_toml_str(text), Err(PabloError::Config(_))),
                "{}",
                text
            );
        }
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PabloConfig::load(dir.path().join("absent.toml")).expect("load");
        assert_eq!(config, PabloConfig::default());
    }
}
