//! Engine configuration loaded from `pipeline.toml`.
//!
//! The config carries the externally tunable knobs: per-stage budget
//! tuning, ledger limits and chunking parameters, cache enablement, and
//! the language profile. Everything has a sensible default; a missing file
//! is not an error.
//!
//! # Configuration File Format
//!
//! ```toml
//! [budget]
//! profile = "standard"
//! cap_hint = 16000
//!
//! [budget.stages.writer]
//! reserve = 1000
//! minimum = 2000
//! default = 9000
//! hard_cap = 24000
//!
//! [cache]
//! enabled = true
//!
//! [ledger]
//! limit = 40000
//! chunk_size = 12000
//! overlap = 400
//! summary_target = 4000
//!
//! [tools]
//! full = ["web_search", "read_file"]
//! reduced = ["read_file"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::budget::{BudgetTuning, LanguageProfile};
use crate::errors::ConfigError;
use crate::ledger::ChunkingParams;
use crate::stage::StageId;

/// Budget configuration: language profile, optional global cap hint, and
/// per-stage tuning overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    #[serde(default)]
    pub profile: LanguageProfile,
    /// Global fallback cap hint, in units. Absent means stages fall back
    /// to their tuning defaults.
    #[serde(default)]
    pub cap_hint: Option<u64>,
    /// Per-stage overrides, keyed by stage name.
    #[serde(default)]
    pub stages: HashMap<String, BudgetTuning>,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

/// Ledger configuration: the per-run read limit plus chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Character limit per run. Zero disables budgeting.
    #[serde(default = "default_ledger_limit")]
    pub limit: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_summary_target")]
    pub summary_target: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            limit: default_ledger_limit(),
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            summary_target: default_summary_target(),
        }
    }
}

impl LedgerConfig {
    /// The chunking parameters for the reducer.
    pub fn chunking(&self) -> ChunkingParams {
        ChunkingParams {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            summary_target: self.summary_target,
        }
    }
}

fn default_ledger_limit() -> usize {
    200_000
}

fn default_chunk_size() -> usize {
    12_000
}

fn default_overlap() -> usize {
    400
}

fn default_summary_target() -> usize {
    4_000
}

/// Tool sets offered to the generation capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_full_tools")]
    pub full: Vec<String>,
    #[serde(default = "default_reduced_tools")]
    pub reduced: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            full: default_full_tools(),
            reduced: default_reduced_tools(),
        }
    }
}

fn default_full_tools() -> Vec<String> {
    vec!["web_search".to_string(), "read_file".to_string()]
}

fn default_reduced_tools() -> Vec<String> {
    vec!["read_file".to_string()]
}

/// The unified engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig =
            toml::from_str(&content).map_err(|source| ConfigError::ParseFailed {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not
    /// exist. Parse and validation failures still surface.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Validate every stage tuning entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (stage, tuning) in &self.budget.stages {
            tuning
                .validate()
                .map_err(|message| ConfigError::InvalidTuning {
                    stage: stage.clone(),
                    message,
                })?;
        }
        Ok(())
    }

    /// The budget tuning for a stage: the configured override when present,
    /// otherwise the built-in table.
    pub fn tuning_for(&self, stage: StageId) -> BudgetTuning {
        self.budget
            .stages
            .get(stage.name())
            .copied()
            .unwrap_or_else(|| default_tuning(stage))
    }
}

/// Built-in budget tuning per stage.
///
/// Early stages get modest shares; the writer gets the largest slice of
/// the window, and quality scoring runs lean. These are starting points,
/// meant to be overridden from `pipeline.toml`.
fn default_tuning(stage: StageId) -> BudgetTuning {
    match stage {
        StageId::Scout => BudgetTuning::new(500, 1_000, 6_000, 12_000),
        StageId::Plan => BudgetTuning::new(500, 1_000, 6_000, 12_000),
        StageId::Evidence => BudgetTuning::new(800, 1_500, 8_000, 16_000),
        StageId::Writer => BudgetTuning::new(1_000, 2_000, 12_000, 24_000),
        StageId::Polish => BudgetTuning::new(1_000, 2_000, 10_000, 20_000),
        StageId::Quality => BudgetTuning::new(500, 1_000, 4_000, 8_000),
        StageId::Export => BudgetTuning::new(500, 1_000, 4_000, 8_000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.cache.enabled);
        assert_eq!(config.ledger.limit, 200_000);
        assert_eq!(config.budget.profile, LanguageProfile::Standard);
        assert!(config.budget.cap_hint.is_none());
        assert_eq!(config.tools.full, vec!["web_search", "read_file"]);
    }

    #[test]
    fn test_load_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            r#"
[budget]
profile = "dense"
cap_hint = 16000

[budget.stages.writer]
reserve = 1000
minimum = 2000
default = 9000
hard_cap = 24000

[cache]
enabled = false

[ledger]
limit = 40000
chunk_size = 8000
overlap = 200
summary_target = 2000

[tools]
full = ["web_search"]
reduced = []
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.budget.profile, LanguageProfile::Dense);
        assert_eq!(config.budget.cap_hint, Some(16_000));
        assert!(!config.cache.enabled);
        assert_eq!(config.ledger.limit, 40_000);
        assert_eq!(config.ledger.chunking().chunk_size, 8_000);
        assert!(config.tools.reduced.is_empty());

        let writer = config.tuning_for(StageId::Writer);
        assert_eq!(writer, BudgetTuning::new(1_000, 2_000, 9_000, 24_000));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(&path, "[ledger]\nlimit = 1000\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.ledger.limit, 1_000);
        assert_eq!(config.ledger.chunk_size, 12_000);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = EngineConfig::load_or_default(Path::new("/nonexistent/pipeline.toml"));
        assert!(config.is_ok());
        assert!(config.unwrap().cache.enabled);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(&path, "not [ valid toml").unwrap();

        let result = EngineConfig::load(&path);
        assert!(matches!(result, Err(ConfigError::ParseFailed { .. })));
    }

    #[test]
    fn test_invalid_tuning_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            r#"
[budget.stages.writer]
reserve = 0
minimum = 5000
default = 100
hard_cap = 1000
"#,
        )
        .unwrap();

        let result = EngineConfig::load(&path);
        match result {
            Err(ConfigError::InvalidTuning { stage, .. }) => assert_eq!(stage, "writer"),
            other => panic!("expected InvalidTuning, got {:?}", other),
        }
    }

    #[test]
    fn test_every_stage_has_builtin_tuning() {
        let config = EngineConfig::default();
        for stage in StageId::ALL {
            let tuning = config.tuning_for(stage);
            assert!(tuning.validate().is_ok(), "bad builtin tuning for {}", stage);
        }
    }

    #[test]
    fn test_unknown_stage_key_is_carried_not_rejected() {
        // Stage tables are keyed by name so a config written for a newer
        // build loads cleanly; unknown keys simply never match a StageId.
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            r#"
[budget.stages.renderer]
reserve = 0
minimum = 1
default = 10
hard_cap = 100
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(config.budget.stages.contains_key("renderer"));
        // Known stages are unaffected
        assert_eq!(config.tuning_for(StageId::Writer), default_tuning(StageId::Writer));
    }
}
