//! Cumulative external-read budgeting for a run.
//!
//! Every external document read passes through the ledger, independent of
//! stage boundaries. The counter is monotonic and never resets mid-run.
//! A read that would exceed the remaining budget is not truncated silently:
//! it is split into overlapping chunks, summarized through the external
//! reduce capability, and archived so an operator can recover the lossy
//! reduction (see `reducer`). An exhausted budget yields a fixed,
//! error-shaped note instead of content — visible, never silent.

mod reducer;

pub use reducer::{ChunkedReducer, ChunkingParams, Reduction, split_chunks};

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Returned in place of content once the read budget is spent.
pub const BUDGET_EXHAUSTED_NOTE: &str =
    "[tool read budget exhausted: content withheld for the remainder of this run]";

/// Characters reserved for the reduction header and notes; a read arriving
/// with less remaining budget than this gets the exhausted note instead.
const REDUCTION_OVERHEAD_CHARS: usize = 256;

/// Minimum workable remainder for a chunked reduction.
const MIN_REDUCTION_REMAINDER: usize = 512;

/// Audit entry for one external read.
#[derive(Debug, Clone, Serialize)]
pub struct ToolReadRecord {
    pub label: String,
    pub raw_chars: usize,
    pub charged: usize,
    pub artifact_dir: Option<PathBuf>,
}

/// Tracks cumulative characters consumed by external reads this run.
#[derive(Debug)]
pub struct ToolBudgetLedger {
    limit: usize,
    used: usize,
    reads: Vec<ToolReadRecord>,
}

impl ToolBudgetLedger {
    /// Create a ledger with the given character limit. A zero limit
    /// disables budgeting entirely.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: 0,
            reads: Vec::new(),
        }
    }

    /// The configured limit. Zero means budgeting is disabled.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Characters consumed so far.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Characters still available, saturating at zero.
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.used)
    }

    /// Whether the budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.limit > 0 && self.used >= self.limit
    }

    /// Audit records for every budgeted read, in charge order.
    pub fn reads(&self) -> &[ToolReadRecord] {
        &self.reads
    }

    /// Charge a read against the budget, reducing it if necessary.
    ///
    /// - Budgeting disabled: the payload passes through unchanged.
    /// - Budget exhausted (or no workable remainder): the fixed exhausted
    ///   note replaces the content, bounding overshoot by its own length.
    /// - Payload fits the remainder: charged in full, returned unchanged.
    /// - Otherwise: the raw body is chunk-reduced and archived; the
    ///   returned digest (header, summary, artifact note, truncation note)
    ///   is what gets charged.
    pub fn charge(
        &mut self,
        payload: String,
        raw: &str,
        label: &str,
        reducer: &ChunkedReducer<'_>,
    ) -> Result<String> {
        if self.limit == 0 {
            return Ok(payload);
        }

        let raw_chars = raw.chars().count();
        let remaining = self.remaining();

        if self.is_exhausted() || remaining < MIN_REDUCTION_REMAINDER {
            warn!(label, used = self.used, limit = self.limit, "read budget exhausted");
            // The note itself is charged at most once: past the limit the
            // counter stays put, keeping overshoot within one note length.
            let charged = if self.used < self.limit {
                BUDGET_EXHAUSTED_NOTE.chars().count()
            } else {
                0
            };
            self.used += charged;
            self.reads.push(ToolReadRecord {
                label: label.to_string(),
                raw_chars,
                charged,
                artifact_dir: None,
            });
            return Ok(BUDGET_EXHAUSTED_NOTE.to_string());
        }

        let payload_chars = payload.chars().count();
        if payload_chars <= remaining {
            debug!(label, chars = payload_chars, remaining, "read charged in full");
            self.used += payload_chars;
            self.reads.push(ToolReadRecord {
                label: label.to_string(),
                raw_chars,
                charged: payload_chars,
                artifact_dir: None,
            });
            return Ok(payload);
        }

        info!(
            label,
            chars = payload_chars,
            remaining,
            "read exceeds remaining budget, reducing in chunks"
        );
        let target = reducer
            .params()
            .summary_target
            .min(remaining - REDUCTION_OVERHEAD_CHARS);
        let reduction = reducer.reduce(raw, label, target)?;

        let result = format!(
            "[reduced from {} chars: {}]\n{}\n[chunks and full text archived at {}]\n\
             [content shortened to honor the per-run read budget]",
            raw_chars,
            label,
            reduction.summary,
            reduction.artifact_dir.display()
        );

        let charged = result.chars().count();
        self.used += charged;
        self.reads.push(ToolReadRecord {
            label: label.to_string(),
            raw_chars,
            charged,
            artifact_dir: Some(reduction.artifact_dir),
        });
        Ok(result)
    }
}

/// Document access with every read charged against the ledger.
///
/// This is the seam collaborators use instead of raw `DocumentSource`
/// access: reads pass through `charge`, so no single read can blow the
/// per-run budget and every reduction leaves an artifact trail.
pub struct BudgetedReader<'a> {
    source: &'a dyn crate::capability::DocumentSource,
    reducer: ChunkedReducer<'a>,
    ledger: ToolBudgetLedger,
}

impl<'a> BudgetedReader<'a> {
    /// Wrap a document source with a ledger and reducer.
    pub fn new(
        source: &'a dyn crate::capability::DocumentSource,
        reducer: ChunkedReducer<'a>,
        ledger: ToolBudgetLedger,
    ) -> Self {
        Self {
            source,
            reducer,
            ledger,
        }
    }

    /// Read a file, charging its content against the run budget.
    pub fn read_file(&mut self, path: &std::path::Path) -> Result<String> {
        let raw = self.source.read_file(path)?;
        let label = path.display().to_string();
        self.ledger.charge(raw.clone(), &raw, &label, &self.reducer)
    }

    /// List files matching a pattern. Listings are not content and are not
    /// charged.
    pub fn list_files(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        self.source.list_files(pattern)
    }

    /// The ledger state, for reporting.
    pub fn ledger(&self) -> &ToolBudgetLedger {
        &self.ledger
    }
}
