//! Per-run context.
//!
//! One `RunContext` is constructed per pipeline run and passed by reference
//! to every component that needs it. There is no package-level mutable
//! state: anything that used to be ambient (active model, run directory,
//! capability flags) lives here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::budget::BudgetEstimator;
use crate::cache::ScopeSignature;
use crate::config::EngineConfig;
use crate::stage::StageId;

/// Immutable context for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    run_dir: PathBuf,
    model: String,
    web_search_enabled: bool,
    source_index_digest: String,
    scope_extras: BTreeMap<String, String>,
    config: EngineConfig,
}

impl RunContext {
    /// Create a context for a run rooted at `run_dir`.
    pub fn new(run_dir: impl Into<PathBuf>, model: &str, config: EngineConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            run_dir: run_dir.into(),
            model: model.to_string(),
            web_search_enabled: false,
            source_index_digest: String::new(),
            scope_extras: BTreeMap::new(),
            config,
        }
    }

    /// Enable or disable web search for the generation capability. This
    /// flows into the cache scope signature.
    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search_enabled = enabled;
        self
    }

    /// Record the digest of the source index this run reads from.
    pub fn with_source_index_digest(mut self, digest: &str) -> Self {
        self.source_index_digest = digest.to_string();
        self
    }

    /// Add a deployment-specific scope signature entry.
    pub fn with_scope_extra(mut self, key: &str, value: &str) -> Self {
        self.scope_extras.insert(key.to_string(), value.to_string());
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn web_search_enabled(&self) -> bool {
        self.web_search_enabled
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Where cache records live for this run.
    pub fn cache_dir(&self) -> PathBuf {
        self.run_dir.join("cache")
    }

    /// Where reduction artifacts live for this run.
    pub fn reads_dir(&self) -> PathBuf {
        self.run_dir.join("reads")
    }

    /// The estimator for this run's language profile.
    pub fn estimator(&self) -> BudgetEstimator {
        BudgetEstimator::new(self.config.budget.profile)
    }

    /// The cache scope signature for this run.
    pub fn scope_signature(&self) -> ScopeSignature {
        ScopeSignature {
            web_search_enabled: self.web_search_enabled,
            source_index_digest: self.source_index_digest.clone(),
            extras: self.scope_extras.clone(),
        }
    }

    /// Rendering of a stage's budget parameters for cache key derivation.
    pub fn budget_params(&self, stage: StageId) -> String {
        let tuning = self.config.tuning_for(stage);
        let resolved = tuning.resolve(self.config.budget.cap_hint);
        format!(
            "budget={};reserve={};minimum={};hard_cap={};profile={:?}",
            resolved, tuning.reserve, tuning.minimum, tuning.hard_cap, self.config.budget.profile
        )
    }
}
