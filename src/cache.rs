//! Deterministic content-addressed cache for generation outputs.
//!
//! One record per (stage, key). The key hashes every input that determines
//! the correct output: schema version, stage, model, prompt, payload, scope
//! signature, budget parameters, and run path — each length-prefixed so
//! field boundaries cannot be confused. Records are append-only; first
//! writer wins, nothing expires, and deleting the file is the only
//! invalidation path. Correctness therefore rests entirely on the scope
//! signature capturing every factor that silently changes the right answer
//! for the same nominal inputs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::stage::StageId;

/// Bumped whenever key derivation or the record layout changes.
const CACHE_SCHEMA_VERSION: &str = "v1";

/// Factors that silently affect generation correctness despite identical
/// visible inputs.
///
/// The field set is a configuration point to review against the deployed
/// capability set, not an exhaustive list; `extras` holds deployment
/// specific entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSignature {
    /// Whether the generation capability may search the web
    pub web_search_enabled: bool,
    /// Digest of the source index the run reads from
    pub source_index_digest: String,
    /// Deployment-specific additions
    pub extras: BTreeMap<String, String>,
}

impl ScopeSignature {
    /// Deterministic rendering used in key derivation.
    pub fn render(&self) -> String {
        let mut parts = vec![
            format!("web_search={}", self.web_search_enabled),
            format!("source_index={}", self.source_index_digest),
        ];
        for (key, value) in &self.extras {
            parts.push(format!("{}={}", key, value));
        }
        parts.join(";")
    }
}

/// The seven inputs that determine a cache key, in hashing order.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyInputs<'a> {
    pub stage: StageId,
    pub model: &'a str,
    pub prompt: &'a str,
    pub payload: &'a str,
    pub scope: &'a ScopeSignature,
    pub budget_params: &'a str,
    pub run_path: &'a str,
}

impl CacheKeyInputs<'_> {
    /// Derive the cache key: SHA-256 over the length-prefixed fields.
    pub fn key(&self) -> String {
        let scope = self.scope.render();
        let fields: [&str; 8] = [
            CACHE_SCHEMA_VERSION,
            self.stage.name(),
            self.model,
            self.prompt,
            self.payload,
            &scope,
            self.budget_params,
            self.run_path,
        ];

        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A persisted cache record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub content: String,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    pub created_at: String,
}

/// Content-addressed store for expensive generation results.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
    enabled: bool,
}

impl ContentCache {
    /// Create a cache rooted at `root`. A disabled cache always computes.
    pub fn new(root: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            root: root.into(),
            enabled,
        }
    }

    /// Whether caching is active for this run.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Path of the record for a (stage, key) pair.
    pub fn record_path(&self, stage: StageId, key: &str) -> PathBuf {
        self.root.join(stage.name()).join(format!("{}.json", key))
    }

    /// Return the cached content for these inputs, or compute, persist, and
    /// return fresh content.
    ///
    /// The second tuple element reports whether the result came from cache.
    /// A malformed record is a miss; I/O failures reading or writing a
    /// record propagate. An existing record is never overwritten.
    pub fn get_or_compute<F>(
        &self,
        inputs: &CacheKeyInputs<'_>,
        compute: F,
    ) -> Result<(String, bool)>
    where
        F: FnOnce() -> Result<String>,
    {
        if !self.enabled {
            return Ok((compute()?, false));
        }

        let key = inputs.key();
        let path = self.record_path(inputs.stage, &key);

        if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read cache record: {}", path.display()))?;
            match serde_json::from_str::<CacheRecord>(&raw) {
                Ok(record) => {
                    debug!(stage = %inputs.stage, key = %&key[..12], "cache hit");
                    return Ok((record.content, true));
                }
                Err(err) => {
                    warn!(
                        stage = %inputs.stage,
                        path = %path.display(),
                        error = %err,
                        "malformed cache record, treating as miss"
                    );
                }
            }
        }

        debug!(stage = %inputs.stage, key = %&key[..12], "cache miss, computing");
        let content = compute()?;

        if !path.exists() {
            self.persist(&path, inputs, &content)?;
        }

        Ok((content, false))
    }

    fn persist(&self, path: &Path, inputs: &CacheKeyInputs<'_>, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }

        let mut meta = BTreeMap::new();
        meta.insert("stage".to_string(), inputs.stage.name().to_string());
        meta.insert("model".to_string(), inputs.model.to_string());
        meta.insert(
            "payload_chars".to_string(),
            inputs.payload.chars().count().to_string(),
        );

        let record = CacheRecord {
            content: content.to_string(),
            meta,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let json =
            serde_json::to_string_pretty(&record).context("Failed to serialize cache record")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write cache record: {}", path.display()))?;
        Ok(())
    }
}
