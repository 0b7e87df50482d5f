//! Typed error hierarchy for the kiln engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `RunnerError` — pipeline execution failures
//! - `ConfigError` — engine configuration loading and validation
//! - `ArtifactError` — reduction artifact persistence
//!
//! Overflow from the generation capability is deliberately NOT a typed
//! variant: the external capability gives no structured code, so overflow is
//! classified heuristically from error text (see `retry::is_overflow_error`)
//! and handled inside the retry ladder. Ledger exhaustion is likewise not an
//! error — it surfaces as error-shaped content so downstream stages keep
//! operating on degraded input.

use crate::stage::StageId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the pipeline runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Stage {stage} failed: {source}")]
    StageFailed {
        stage: StageId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write workflow summary at {path}: {source}")]
    SummaryWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Request enabled no stages")]
    EmptyPlan,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from loading or validating the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid budget tuning for stage {stage}: {message}")]
    InvalidTuning { stage: String, message: String },
}

/// Errors from persisting chunked-reduction artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to create artifact directory {path}: {source}")]
    DirCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Reduction failed for '{label}': {source}")]
    ReduceFailed {
        label: String,
        #[source]
        source: anyhow::Error,
    },
}
