//! Sequential pipeline execution, single- and multi-pass.
//!
//! The runner drives the full control flow: plan the requested stages, run
//! them one at a time in plan order (no stage starts before its enabled
//! dependencies are terminal — plan order guarantees it), wrap each
//! expensive generation call in the content cache and the overflow retry
//! ladder, and persist the workflow summary.
//!
//! When a caller requests two or more top-level bundles out of canonical
//! order, execution switches to multi-pass: one pass per bundle in
//! topological order, each restricted to that bundle's members, with
//! accumulated state threaded forward as an owned value and per-pass
//! statuses merged at the end.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::assemble::{Section, SectionAssembler};
use crate::cache::{CacheKeyInputs, ContentCache};
use crate::capability::Generator;
use crate::context::RunContext;
use crate::errors::RunnerError;
use crate::plan::{ExecutionPlan, ExecutionPlanner, PlanRequest, needs_multipass, toplevel_plan};
use crate::retry::{OverflowRetryController, RetryLevel, STATIC_FALLBACK_DETAIL};
use crate::stage::{BundleId, StageId};
use crate::status::{StageStatus, StatusTracker};

/// Accumulated pipeline state, threaded between stages and passes.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    /// Latest output per stage
    outputs: BTreeMap<StageId, String>,
    /// The document body, maintained by the stages that draft it
    document: String,
}

impl PipelineState {
    /// The latest output of a stage, if it has produced one.
    pub fn output(&self, stage: StageId) -> Option<&str> {
        self.outputs.get(&stage).map(String::as_str)
    }

    /// The accumulated document body.
    pub fn document(&self) -> &str {
        &self.document
    }

    /// Whether the run has produced primary output.
    pub fn has_document(&self) -> bool {
        !self.document.is_empty()
    }

    fn absorb(&mut self, stage: StageId, text: &str) {
        self.outputs.insert(stage, text.to_string());
        if stage.updates_document() {
            self.document = text.to_string();
        }
    }
}

/// Supplies per-stage prompt text and payload sections.
///
/// Prompt wording and section content are collaborator concerns; the
/// engine only schedules, budgets, caches, and retries around them.
pub trait StagePayloadSource {
    /// The system prompt for a stage.
    fn system_prompt(&self, stage: StageId, state: &PipelineState) -> String;

    /// The payload sections for a stage. All-empty sections make the stage
    /// skip.
    fn sections(&self, stage: StageId, state: &PipelineState) -> Vec<Section>;

    /// Compact stand-ins substituted for sections under budget pressure.
    fn fallbacks(&self, stage: StageId, state: &PipelineState) -> Option<HashMap<String, String>> {
        let _ = (stage, state);
        None
    }

    /// Terminal overflow fallback: a summary built purely from state the
    /// pipeline already holds. No external calls.
    fn static_summary(&self, stage: StageId, state: &PipelineState) -> String {
        let mut parts = vec![format!("[static summary for {}]", stage)];
        for (prior, output) in &state.outputs {
            let head: String = output.chars().take(400).collect();
            parts.push(format!("{}: {}", prior, head));
        }
        parts.join("\n")
    }
}

/// A caller's run request, by stage or bundle name.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Stage and/or bundle names to run. Empty means the full pipeline.
    pub stages: Vec<String>,
    /// Stage names to skip.
    pub skip: Vec<String>,
    /// Disable dependency auto-expansion.
    pub no_expand: bool,
}

impl RunRequest {
    /// Request the full pipeline.
    pub fn all() -> Self {
        Self::default()
    }

    /// Request specific stages or bundles by name.
    pub fn stages(names: &[&str]) -> Self {
        Self {
            stages: names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Report of a completed run.
#[derive(Debug)]
pub struct RunReport {
    /// Final merged statuses, also persisted as the workflow summary
    pub status: StatusTracker,
    /// Final pipeline state (see multi-pass selection rules)
    pub state: PipelineState,
    /// Number of passes executed
    pub passes: usize,
}

/// Executes pipeline runs against the external capabilities.
pub struct PipelineRunner<'a> {
    ctx: &'a RunContext,
    generator: &'a dyn Generator,
    source: &'a dyn StagePayloadSource,
}

impl<'a> PipelineRunner<'a> {
    /// Create a runner for one run context.
    pub fn new(
        ctx: &'a RunContext,
        generator: &'a dyn Generator,
        source: &'a dyn StagePayloadSource,
    ) -> Self {
        Self {
            ctx,
            generator,
            source,
        }
    }

    /// Execute a request and persist the workflow summary.
    pub fn run(&self, request: &RunRequest) -> Result<RunReport, RunnerError> {
        let bundles: Vec<BundleId> = request
            .stages
            .iter()
            .filter_map(|name| BundleId::parse(name))
            .collect();

        if needs_multipass(&bundles) {
            self.run_multipass(&bundles, request)
        } else {
            self.run_single(request)
        }
    }

    fn run_single(&self, request: &RunRequest) -> Result<RunReport, RunnerError> {
        let include = expand_bundle_names(&request.stages);
        let include_refs: Vec<&str> = include.iter().map(String::as_str).collect();
        let skip_refs: Vec<&str> = request.skip.iter().map(String::as_str).collect();
        let plan = ExecutionPlanner::plan(&PlanRequest::from_names(
            &include_refs,
            &skip_refs,
            request.no_expand,
        ));
        if plan.is_empty() {
            return Err(RunnerError::EmptyPlan);
        }

        info!(
            run_id = %self.ctx.run_id(),
            stages = ?plan.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "executing single-pass plan"
        );

        let mut tracker = StatusTracker::from_plan(&plan);
        let mut state = PipelineState::default();
        self.run_pass(&plan, &mut tracker, &mut state)?;

        tracker.write_summary(self.ctx.run_dir())?;
        Ok(RunReport {
            status: tracker,
            state,
            passes: 1,
        })
    }

    fn run_multipass(
        &self,
        bundles: &[BundleId],
        request: &RunRequest,
    ) -> Result<RunReport, RunnerError> {
        let order = toplevel_plan(bundles);
        info!(
            run_id = %self.ctx.run_id(),
            passes = ?order.iter().map(|b| b.name()).collect::<Vec<_>>(),
            "top-level request out of canonical order, executing multi-pass"
        );

        let skip_refs: Vec<&str> = request.skip.iter().map(String::as_str).collect();
        let mut pass_trackers = Vec::with_capacity(order.len());
        let mut pass_states: Vec<PipelineState> = Vec::with_capacity(order.len());
        let mut state = PipelineState::default();

        for (idx, bundle) in order.iter().enumerate() {
            // Each pass runs exactly the bundle's members; dependencies
            // from earlier bundles arrive through the threaded state.
            let member_names: Vec<&str> = bundle.members().iter().map(|s| s.name()).collect();
            let plan =
                ExecutionPlanner::plan(&PlanRequest::from_names(&member_names, &skip_refs, true));

            info!(pass = idx + 1, bundle = %bundle, "starting pass");
            let mut tracker = StatusTracker::from_plan(&plan);
            self.run_pass(&plan, &mut tracker, &mut state)?;

            pass_trackers.push(tracker);
            pass_states.push(state.clone());
        }

        let merged = StatusTracker::merge_passes(&pass_trackers);
        merged.write_summary(self.ctx.run_dir())?;

        // Final state: the last pass that had primary output, falling back
        // to the final pass's raw state.
        let state = pass_states
            .iter()
            .rev()
            .find(|s| s.has_document())
            .cloned()
            .or_else(|| pass_states.last().cloned())
            .unwrap_or_default();

        Ok(RunReport {
            status: merged,
            state,
            passes: order.len(),
        })
    }

    fn run_pass(
        &self,
        plan: &ExecutionPlan,
        tracker: &mut StatusTracker,
        state: &mut PipelineState,
    ) -> Result<(), RunnerError> {
        let assembler = SectionAssembler::new(self.ctx.estimator());
        let cache = ContentCache::new(self.ctx.cache_dir(), self.ctx.config().cache.enabled);
        let tools = &self.ctx.config().tools;
        let controller = OverflowRetryController::new(
            &assembler,
            self.generator,
            tools.full.clone(),
            tools.reduced.clone(),
        );

        for &stage in &plan.stages {
            let sections = self.source.sections(stage, state);
            if sections.iter().all(|s| s.content.is_empty()) {
                info!(stage = %stage, "skipping stage with empty payload");
                tracker.mark(stage, StageStatus::Skipped, "empty payload");
                continue;
            }

            let tuning = self.ctx.config().tuning_for(stage);
            let budget = tuning.resolve(self.ctx.config().budget.cap_hint);
            info!(stage = %stage, budget, "running stage");

            let prompt = self.source.system_prompt(stage, state);
            let fallbacks = self.source.fallbacks(stage, state);

            // The cache key uses the payload as assembled at the full
            // budget; retry-ladder reassemblies stay behind the same key.
            let keyed = assembler.assemble(&sections, budget, fallbacks.as_ref(), false);
            let scope = self.ctx.scope_signature();
            let budget_params = self.ctx.budget_params(stage);
            let run_path = self.ctx.run_dir().display().to_string();
            let inputs = CacheKeyInputs {
                stage,
                model: self.ctx.model(),
                prompt: &prompt,
                payload: &keyed.payload,
                scope: &scope,
                budget_params: &budget_params,
                run_path: &run_path,
            };

            let mut detail: Option<String> = None;
            let (text, was_cached) = cache
                .get_or_compute(&inputs, || {
                    let outcome = controller.run(
                        stage,
                        &prompt,
                        &sections,
                        budget,
                        fallbacks.as_ref(),
                        || self.source.static_summary(stage, state),
                    )?;
                    detail = Some(describe_level(outcome.level).to_string());
                    Ok(outcome.text)
                })
                .map_err(|source| RunnerError::StageFailed { stage, source })?;

            state.absorb(stage, &text);
            if was_cached {
                debug!(stage = %stage, "stage satisfied from cache");
                tracker.mark(stage, StageStatus::Cached, "cache hit");
            } else {
                tracker.mark(
                    stage,
                    StageStatus::Ran,
                    detail.as_deref().unwrap_or("generated"),
                );
            }
        }

        Ok(())
    }
}

/// Expand bundle names in a request to their member stage names, leaving
/// fine-grained names untouched.
fn expand_bundle_names(names: &[String]) -> Vec<String> {
    let mut expanded = Vec::new();
    for name in names {
        match BundleId::parse(name) {
            Some(bundle) => {
                expanded.extend(bundle.members().iter().map(|s| s.name().to_string()));
            }
            None => expanded.push(name.clone()),
        }
    }
    expanded
}

fn describe_level(level: RetryLevel) -> &'static str {
    match level {
        RetryLevel::Initial => "generated",
        RetryLevel::HalvedBudget => "generated after overflow retry at half budget",
        RetryLevel::ReducedTools => "generated after overflow retry with reduced tools",
        RetryLevel::StaticFallback => STATIC_FALLBACK_DETAIL,
    }
}
