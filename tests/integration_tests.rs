//! Integration tests for kiln
//!
//! These tests exercise the engine end-to-end: planning, budgeted
//! assembly, cached generation, the overflow ladder, multi-pass merging,
//! and read-budget enforcement, all against real temp directories.

use anyhow::Result;
use std::cell::RefCell;
use std::collections::BTreeSet;
use tempfile::TempDir;

use kiln::assemble::{Section, SectionAssembler, SectionPriority};
use kiln::budget::{BudgetEstimator, LanguageProfile};
use kiln::capability::{FsDocumentSource, Generator, Reducer};
use kiln::config::EngineConfig;
use kiln::context::RunContext;
use kiln::ledger::{BudgetedReader, ChunkedReducer, ChunkingParams, ToolBudgetLedger};
use kiln::plan::{ExecutionPlanner, PlanRequest};
use kiln::retry::STATIC_FALLBACK_DETAIL;
use kiln::runner::{PipelineRunner, PipelineState, RunRequest, StagePayloadSource};
use kiln::stage::StageId;
use kiln::status::StageStatus;

/// Generator stub recording every call, optionally overflowing first.
struct StubGenerator {
    overflow_first: usize,
    calls: RefCell<Vec<(String, Vec<String>, String)>>,
}

impl StubGenerator {
    fn ok() -> Self {
        Self {
            overflow_first: 0,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn overflowing_forever() -> Self {
        Self {
            overflow_first: usize::MAX,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Generator for StubGenerator {
    fn generate(&self, system_prompt: &str, tools: &[String], payload: &str) -> Result<String> {
        let mut calls = self.calls.borrow_mut();
        calls.push((
            system_prompt.to_string(),
            tools.to_vec(),
            payload.to_string(),
        ));
        if calls.len() <= self.overflow_first {
            anyhow::bail!("input exceeds the maximum context length");
        }
        Ok(format!("generated<{}>", system_prompt))
    }
}

/// Reducer stub that truncates to the target.
struct StubReducer;

impl Reducer for StubReducer {
    fn reduce(&self, chunk: &str, _label: &str, target_chars: usize) -> Result<String> {
        Ok(chunk.chars().take(target_chars).collect())
    }
}

/// Payload source with one section per stage, threading evidence forward.
struct StubSource;

impl StagePayloadSource for StubSource {
    fn system_prompt(&self, stage: StageId, _state: &PipelineState) -> String {
        format!("{} prompt", stage)
    }

    fn sections(&self, stage: StageId, state: &PipelineState) -> Vec<Section> {
        let mut sections = vec![Section::new("task", format!("do the {} work", stage))];
        if stage == StageId::Writer {
            if let Some(evidence) = state.output(StageId::Evidence) {
                sections.push(Section::new("evidence", evidence).with_header("## Evidence"));
            }
        }
        sections
    }
}

fn run_context(dir: &TempDir) -> RunContext {
    RunContext::new(dir.path(), "claude-sonnet", EngineConfig::default())
}

// =============================================================================
// Planning
// =============================================================================

mod planning {
    use super::*;

    #[test]
    fn test_writer_request_enables_exact_dependency_chain() {
        let plan = ExecutionPlanner::plan(&PlanRequest::from_names(&["writer"], &[], false));

        let expected: BTreeSet<StageId> = [
            StageId::Scout,
            StageId::Plan,
            StageId::Evidence,
            StageId::Writer,
        ]
        .into_iter()
        .collect();
        assert_eq!(plan.enabled, expected);
        assert!(!plan.enabled.contains(&StageId::Quality));
    }

    #[test]
    fn test_plans_are_dependency_consistent_for_every_subset() {
        for mask in 0u32..(1 << StageId::ALL.len()) {
            let include: Vec<&str> = StageId::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, s)| s.name())
                .collect();
            let plan = ExecutionPlanner::plan(&PlanRequest::from_names(&include, &[], false));

            for (i, stage) in plan.stages.iter().enumerate() {
                for dep in stage.dependencies() {
                    match plan.stages.iter().position(|s| s == dep) {
                        Some(pos) => assert!(pos < i),
                        None => assert!(!plan.enabled.contains(dep)),
                    }
                }
            }
        }
    }
}

// =============================================================================
// End-to-end runs
// =============================================================================

mod runs {
    use super::*;

    #[test]
    fn test_full_pipeline_produces_summary_and_document() {
        let dir = TempDir::new().unwrap();
        let ctx = run_context(&dir);
        let generator = StubGenerator::ok();
        let runner = PipelineRunner::new(&ctx, &generator, &StubSource);

        let report = runner.run(&RunRequest::all()).unwrap();

        assert!(report.state.has_document());
        let summary =
            std::fs::read_to_string(dir.path().join("workflow_summary.txt")).unwrap();
        for stage in StageId::ALL {
            assert!(summary.contains(&format!("{}: ran", stage)), "{}", summary);
        }
    }

    #[test]
    fn test_cached_rerun_skips_generation() {
        let dir = TempDir::new().unwrap();
        let ctx = run_context(&dir);
        let generator = StubGenerator::ok();
        let runner = PipelineRunner::new(&ctx, &generator, &StubSource);

        runner.run(&RunRequest::stages(&["writer"])).unwrap();
        let first_calls = generator.call_count();

        let report = runner.run(&RunRequest::stages(&["writer"])).unwrap();
        assert_eq!(generator.call_count(), first_calls);

        for stage in [StageId::Scout, StageId::Plan, StageId::Evidence, StageId::Writer] {
            assert_eq!(
                report.status.record(stage).unwrap().status,
                StageStatus::Cached
            );
        }
    }

    #[test]
    fn test_toggling_web_search_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let generator = StubGenerator::ok();

        let ctx = run_context(&dir);
        PipelineRunner::new(&ctx, &generator, &StubSource)
            .run(&RunRequest::stages(&["scout"]))
            .unwrap();
        assert_eq!(generator.call_count(), 1);

        // Same run directory, same inputs, web search flipped on
        let ctx = run_context(&dir).with_web_search(true);
        PipelineRunner::new(&ctx, &generator, &StubSource)
            .run(&RunRequest::stages(&["scout"]))
            .unwrap();
        assert_eq!(generator.call_count(), 2);
    }

    #[test]
    fn test_unknown_stage_names_are_ignored() {
        let dir = TempDir::new().unwrap();
        let ctx = run_context(&dir);
        let generator = StubGenerator::ok();
        let runner = PipelineRunner::new(&ctx, &generator, &StubSource);

        let report = runner
            .run(&RunRequest::stages(&["scout", "citations", "renderer"]))
            .unwrap();
        assert_eq!(
            report.status.record(StageId::Scout).unwrap().status,
            StageStatus::Ran
        );
    }

    #[test]
    fn test_persistent_overflow_lands_on_static_fallback() {
        let dir = TempDir::new().unwrap();
        let ctx = run_context(&dir);
        let generator = StubGenerator::overflowing_forever();
        let runner = PipelineRunner::new(&ctx, &generator, &StubSource);

        let report = runner.run(&RunRequest::stages(&["scout"])).unwrap();

        let record = report.status.record(StageId::Scout).unwrap();
        assert_eq!(record.status, StageStatus::Ran);
        assert_eq!(record.detail, STATIC_FALLBACK_DETAIL);
        // Three attempts: full, halved, reduced tools — then static
        assert_eq!(generator.call_count(), 3);
        assert!(report.state.output(StageId::Scout).is_some());
    }
}

// =============================================================================
// Multi-pass execution
// =============================================================================

mod multipass {
    use super::*;

    #[test]
    fn test_out_of_order_bundles_merge_statuses_across_passes() {
        let dir = TempDir::new().unwrap();
        let ctx = run_context(&dir);
        let generator = StubGenerator::ok();
        let runner = PipelineRunner::new(&ctx, &generator, &StubSource);

        let report = runner
            .run(&RunRequest::stages(&["review", "draft", "research"]))
            .unwrap();

        assert_eq!(report.passes, 3);
        // Every member stage ran in some pass and survived the merge
        for stage in StageId::ALL {
            let record = report.status.record(stage).unwrap();
            assert_eq!(record.status, StageStatus::Ran, "stage {}", stage);
            assert!(record.detail.starts_with("pass="), "{}", record.detail);
        }
        // Passes executed in topological order
        assert!(report
            .status
            .record(StageId::Scout)
            .unwrap()
            .detail
            .starts_with("pass=1:"));
        assert!(report
            .status
            .record(StageId::Export)
            .unwrap()
            .detail
            .starts_with("pass=3:"));

        assert!(report.state.has_document());
    }

    #[test]
    fn test_multipass_summary_lists_every_stage_once() {
        let dir = TempDir::new().unwrap();
        let ctx = run_context(&dir);
        let generator = StubGenerator::ok();
        let runner = PipelineRunner::new(&ctx, &generator, &StubSource);

        runner
            .run(&RunRequest::stages(&["draft", "research"]))
            .unwrap();

        let summary =
            std::fs::read_to_string(dir.path().join("workflow_summary.txt")).unwrap();
        let writer_lines = summary
            .lines()
            .filter(|l| l.contains("writer:"))
            .count();
        assert_eq!(writer_lines, 1);
    }
}

// =============================================================================
// Budgeted assembly
// =============================================================================

mod assembly {
    use super::*;

    #[test]
    fn test_low_priority_sacrificed_before_high() {
        let assembler =
            SectionAssembler::new(BudgetEstimator::new(LanguageProfile::Standard));
        let low = Section::new("notes", "n".repeat(14_000))
            .with_priority(SectionPriority::Low)
            .with_min_chars(100);
        let high = Section::new("plan", "p".repeat(1_000))
            .with_priority(SectionPriority::High)
            .with_min_chars(100);

        let result = assembler.assemble(&[low, high], 2_000, None, false);

        assert!(result.trimmed);
        assert!(result.payload.contains(&"p".repeat(1_000)));
        assert!(!result.payload.contains(&"n".repeat(14_000)));
        assert!(assembler.estimator().estimate(&result.payload) <= 2_000);
    }

    #[test]
    fn test_oversized_payload_is_char_bounded_by_terminal_fallback() {
        // A 50k low-priority section cannot reach a 2000-unit budget even
        // fully laddered; the terminal path must bound it by characters.
        let assembler =
            SectionAssembler::new(BudgetEstimator::new(LanguageProfile::Standard));
        let low = Section::new("notes", "n".repeat(50_000))
            .with_priority(SectionPriority::Low)
            .with_min_chars(100);
        let high = Section::new("plan", "p".repeat(1_000))
            .with_priority(SectionPriority::High)
            .with_min_chars(100);

        let result = assembler.assemble(&[low, high], 2_000, None, false);

        assert!(result.trimmed);
        let bound = assembler.estimator().chars_for_units(2_000);
        assert!(result.payload.chars().count() <= bound);
    }
}

// =============================================================================
// Read budgeting
// =============================================================================

mod read_budget {
    use super::*;

    #[test]
    fn test_oversized_read_reduced_with_artifacts() {
        let dir = TempDir::new().unwrap();
        let doc_path = dir.path().join("archive.txt");
        std::fs::write(&doc_path, "h".repeat(500_000)).unwrap();

        let stub = StubReducer;
        let fs_source = FsDocumentSource;
        let reducer = ChunkedReducer::new(
            &stub,
            dir.path().join("reads"),
            ChunkingParams::default(),
        );

        // 40k limit with 32k already consumed: 8k remaining
        let mut ledger = ToolBudgetLedger::new(40_000);
        {
            let warmup = ChunkedReducer::new(
                &stub,
                dir.path().join("reads"),
                ChunkingParams::default(),
            );
            let filler = "f".repeat(32_000);
            ledger
                .charge(filler.clone(), &filler, "prior reads", &warmup)
                .unwrap();
        }
        let mut reader = BudgetedReader::new(&fs_source, reducer, ledger);

        let digest = reader.read_file(&doc_path).unwrap();

        assert!(digest.chars().count() <= 8_000);
        assert!(digest.contains("[reduced from 500000 chars"));
        assert!(reader.ledger().used() <= reader.ledger().limit());

        let record = reader.ledger().reads().last().unwrap();
        let artifact_dir = record.artifact_dir.as_ref().unwrap();
        assert!(artifact_dir.join("raw.txt").exists());
        assert!(artifact_dir.join("chunk_001.txt").exists());
        assert!(artifact_dir.join("summary.txt").exists());
        assert!(artifact_dir.join("meta.json").exists());

        // The raw artifact preserves the original read verbatim
        let raw = std::fs::read_to_string(artifact_dir.join("raw.txt")).unwrap();
        assert_eq!(raw.chars().count(), 500_000);
    }
}
