//! Per-stage status tracking and the persisted workflow summary.
//!
//! Each stage carries exactly one status record per run. `Pending` and
//! `Disabled` are the two initial states, decided once from the execution
//! plan before any stage runs. A pending stage transitions exactly once to
//! one of the terminal states; disabled stages never transition. Multi-pass
//! runs produce one tracker per pass and merge them afterwards.

use crate::errors::RunnerError;
use crate::plan::ExecutionPlan;
use crate::stage::StageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Lifecycle status of a stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Enabled, waiting to run
    Pending,
    /// Not enabled by the execution plan
    Disabled,
    /// Executed and produced fresh output
    Ran,
    /// Satisfied from the content cache
    Cached,
    /// Passed over (e.g. nothing to do)
    Skipped,
}

impl StageStatus {
    /// Whether this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ran | Self::Cached | Self::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageStatus::Pending => "pending",
            StageStatus::Disabled => "disabled",
            StageStatus::Ran => "ran",
            StageStatus::Cached => "cached",
            StageStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// One stage's status plus a free-text reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub detail: String,
}

/// Tracks the status of every known stage across a run or a single pass.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    records: BTreeMap<StageId, StageRecord>,
    /// Stage order for rendering: planned stages first, then the rest in
    /// canonical order.
    order: Vec<StageId>,
}

impl StatusTracker {
    /// Initialize from an execution plan: pending if enabled, disabled
    /// otherwise. Every known stage gets a record.
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let mut records = BTreeMap::new();
        let mut order = plan.stages.clone();

        for stage in StageId::ALL {
            if !order.contains(&stage) {
                order.push(stage);
            }
            let status = if plan.is_enabled(stage) {
                StageStatus::Pending
            } else {
                StageStatus::Disabled
            };
            records.insert(
                stage,
                StageRecord {
                    status,
                    detail: String::new(),
                },
            );
        }

        Self { records, order }
    }

    /// Mark a pending stage with a terminal status.
    ///
    /// A stage transitions at most once; disabled stages never transition.
    /// Violations are logged and ignored rather than panicking, since a
    /// stray mark must not take down a run.
    pub fn mark(&mut self, stage: StageId, status: StageStatus, detail: &str) {
        let Some(record) = self.records.get_mut(&stage) else {
            return;
        };
        if record.status != StageStatus::Pending {
            warn!(
                stage = %stage,
                current = %record.status,
                attempted = %status,
                "ignoring status transition from non-pending state"
            );
            return;
        }
        if !status.is_terminal() {
            warn!(stage = %stage, attempted = %status, "ignoring non-terminal mark");
            return;
        }
        record.status = status;
        record.detail = detail.to_string();
    }

    /// The record for a stage, if known.
    pub fn record(&self, stage: StageId) -> Option<&StageRecord> {
        self.records.get(&stage)
    }

    /// All records in rendering order.
    pub fn records(&self) -> impl Iterator<Item = (StageId, &StageRecord)> {
        self.order
            .iter()
            .filter_map(|stage| self.records.get(stage).map(|r| (*stage, r)))
    }

    /// Whether every enabled stage has reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.records
            .values()
            .all(|r| r.status != StageStatus::Pending)
    }

    /// Merge per-pass trackers into a single run-level tracker.
    ///
    /// Passes are visited in order. Each record overwrites the merged entry
    /// unless the incoming status is `Disabled` and the merged map already
    /// holds a non-disabled entry: disabled must never erase progress
    /// recorded by an earlier pass. Details are prefixed with the 1-based
    /// pass index to preserve provenance.
    pub fn merge_passes(passes: &[StatusTracker]) -> StatusTracker {
        let mut merged: BTreeMap<StageId, StageRecord> = BTreeMap::new();

        for (idx, pass) in passes.iter().enumerate() {
            for (stage, record) in pass.records() {
                let keep_existing = merged
                    .get(&stage)
                    .is_some_and(|existing| {
                        record.status == StageStatus::Disabled
                            && existing.status != StageStatus::Disabled
                    });
                if keep_existing {
                    continue;
                }
                merged.insert(
                    stage,
                    StageRecord {
                        status: record.status,
                        detail: format!("pass={}: {}", idx + 1, record.detail),
                    },
                );
            }
        }

        let order: Vec<StageId> = StageId::ALL
            .into_iter()
            .filter(|s| merged.contains_key(s))
            .collect();

        StatusTracker {
            records: merged,
            order,
        }
    }

    /// Render the human-readable workflow summary: one numbered line per
    /// stage in plan order.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for (i, (stage, record)) in self.records().enumerate() {
            out.push_str(&format!(
                "{}. {}: {} ({})\n",
                i + 1,
                stage,
                record.status,
                record.detail
            ));
        }
        out
    }

    /// The machine-readable sibling of the text summary.
    pub fn to_json(&self) -> serde_json::Value {
        let stages: BTreeMap<String, &StageRecord> = self
            .records
            .iter()
            .map(|(stage, record)| (stage.name().to_string(), record))
            .collect();
        let order: Vec<&str> = self.order.iter().map(|s| s.name()).collect();

        serde_json::json!({
            "created_at": chrono::Utc::now().to_rfc3339(),
            "stages": stages,
            "order": order,
        })
    }

    /// Persist both summary files into the run directory.
    pub fn write_summary(&self, dir: &Path) -> Result<(), RunnerError> {
        let text_path = dir.join("workflow_summary.txt");
        std::fs::write(&text_path, self.render_text()).map_err(|source| {
            RunnerError::SummaryWriteFailed {
                path: text_path.clone(),
                source,
            }
        })?;

        let json_path = dir.join("workflow_summary.json");
        let json = serde_json::to_string_pretty(&self.to_json())
            .map_err(|e| RunnerError::Other(e.into()))?;
        std::fs::write(&json_path, json).map_err(|source| RunnerError::SummaryWriteFailed {
            path: json_path,
            source,
        })?;

        Ok(())
    }
}
