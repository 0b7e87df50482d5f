//! Stage and bundle definitions for the kiln pipeline.
//!
//! This module provides:
//! - `StageId`, the closed set of fine-grained runtime stages
//! - `BundleId`, the coarse top-level stages used for multi-pass runs
//! - `StageGraph`, static dependency tables and closure computation
//!
//! The stage set is fixed at compile time. Callers address stages by name;
//! names that do not parse are dropped by the planner rather than rejected,
//! so older callers can probe for stages that may not exist in a build.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A fine-grained runtime stage of the content pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Survey the topic and collect candidate sources
    Scout,
    /// Derive the document plan from scouted material
    Plan,
    /// Gather and grade supporting evidence
    Evidence,
    /// Draft the document body
    Writer,
    /// Tighten and restructure the draft
    Polish,
    /// Score the draft against the plan
    Quality,
    /// Produce the final deliverable
    Export,
}

impl StageId {
    /// All stages in canonical execution order.
    pub const ALL: [StageId; 7] = [
        StageId::Scout,
        StageId::Plan,
        StageId::Evidence,
        StageId::Writer,
        StageId::Polish,
        StageId::Quality,
        StageId::Export,
    ];

    /// The stage's wire name, as used in requests and persisted records.
    pub fn name(&self) -> &'static str {
        match self {
            StageId::Scout => "scout",
            StageId::Plan => "plan",
            StageId::Evidence => "evidence",
            StageId::Writer => "writer",
            StageId::Polish => "polish",
            StageId::Quality => "quality",
            StageId::Export => "export",
        }
    }

    /// Parse a stage name. Returns `None` for unknown names; the planner
    /// drops those silently for forward compatibility.
    pub fn parse(name: &str) -> Option<StageId> {
        match name.trim() {
            "scout" => Some(StageId::Scout),
            "plan" => Some(StageId::Plan),
            "evidence" => Some(StageId::Evidence),
            "writer" => Some(StageId::Writer),
            "polish" => Some(StageId::Polish),
            "quality" => Some(StageId::Quality),
            "export" => Some(StageId::Export),
            _ => None,
        }
    }

    /// Hard dependencies: stages that must reach a terminal status before
    /// this one runs.
    pub fn dependencies(&self) -> &'static [StageId] {
        match self {
            StageId::Scout => &[],
            StageId::Plan => &[StageId::Scout],
            StageId::Evidence => &[StageId::Plan],
            StageId::Writer => &[StageId::Evidence],
            StageId::Polish => &[StageId::Writer],
            StageId::Quality => &[StageId::Writer],
            StageId::Export => &[StageId::Polish, StageId::Quality],
        }
    }

    /// Position of this stage in the canonical order.
    pub fn canonical_index(&self) -> usize {
        StageId::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or(usize::MAX)
    }

    /// Whether this stage's output replaces the accumulated document body.
    pub fn updates_document(&self) -> bool {
        matches!(self, StageId::Writer | StageId::Polish)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A coarse top-level stage: an ordered group of runtime stages.
///
/// Bundles exist for the multi-pass mode: when a caller requests two or more
/// top-level stages out of their canonical relative order, the engine runs
/// one pass per bundle, restricting the runtime stage set to that bundle's
/// members.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BundleId {
    /// Scouting, planning, and evidence gathering
    Research,
    /// Drafting and polishing the document body
    Draft,
    /// Quality scoring and final export
    Review,
}

impl BundleId {
    /// All bundles in canonical execution order.
    pub const ALL: [BundleId; 3] = [BundleId::Research, BundleId::Draft, BundleId::Review];

    /// The bundle's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            BundleId::Research => "research",
            BundleId::Draft => "draft",
            BundleId::Review => "review",
        }
    }

    /// Parse a bundle name. Returns `None` for unknown names.
    pub fn parse(name: &str) -> Option<BundleId> {
        match name.trim() {
            "research" => Some(BundleId::Research),
            "draft" => Some(BundleId::Draft),
            "review" => Some(BundleId::Review),
            _ => None,
        }
    }

    /// Runtime stages that make up this bundle, in execution order.
    pub fn members(&self) -> &'static [StageId] {
        match self {
            BundleId::Research => &[StageId::Scout, StageId::Plan, StageId::Evidence],
            BundleId::Draft => &[StageId::Writer, StageId::Polish],
            BundleId::Review => &[StageId::Quality, StageId::Export],
        }
    }

    /// Top-level dependencies between bundles.
    pub fn dependencies(&self) -> &'static [BundleId] {
        match self {
            BundleId::Research => &[],
            BundleId::Draft => &[BundleId::Research],
            BundleId::Review => &[BundleId::Draft],
        }
    }

    /// Position of this bundle in the canonical order.
    pub fn canonical_index(&self) -> usize {
        BundleId::ALL
            .iter()
            .position(|b| b == self)
            .unwrap_or(usize::MAX)
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static view over the stage dependency tables.
pub struct StageGraph;

impl StageGraph {
    /// All stages in canonical execution order.
    pub fn canonical_order() -> &'static [StageId] {
        &StageId::ALL
    }

    /// Hard dependencies of a stage.
    pub fn dependencies(stage: StageId) -> &'static [StageId] {
        stage.dependencies()
    }

    /// Expand a stage set to its transitive dependency closure.
    ///
    /// Expansion is idempotent: expanding an already-expanded set yields
    /// the same set.
    pub fn expand(stages: &BTreeSet<StageId>) -> BTreeSet<StageId> {
        let mut closed = stages.clone();
        let mut frontier: Vec<StageId> = stages.iter().copied().collect();

        while let Some(stage) = frontier.pop() {
            for &dep in stage.dependencies() {
                if closed.insert(dep) {
                    frontier.push(dep);
                }
            }
        }

        closed
    }

    /// The transitive dependency closure of a single stage, including the
    /// stage itself.
    pub fn closure_of(stage: StageId) -> BTreeSet<StageId> {
        let mut set = BTreeSet::new();
        set.insert(stage);
        Self::expand(&set)
    }
}
