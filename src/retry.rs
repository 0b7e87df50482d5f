//! Overflow detection and the per-stage retry ladder.
//!
//! A generation call can fail late, after partial work, because the payload
//! exceeded the model's input limit. The external capability reports this
//! only as error text, so classification is a substring heuristic isolated
//! behind `is_overflow_error`. On overflow the controller degrades in three
//! mutually exclusive steps — halved budget with fallback sections, reduced
//! tool set at a quarter budget, then a static in-process summary — logging
//! each transition before it happens. Failures that are not overflow-shaped
//! propagate unmodified.

use anyhow::Result;
use std::collections::HashMap;
use tracing::warn;

use crate::assemble::{Section, SectionAssembler};
use crate::capability::Generator;
use crate::stage::StageId;

/// Substrings that identify an overflow-shaped generation error.
const OVERFLOW_MARKERS: [&str; 5] = [
    "context window",
    "too many tokens",
    "maximum context length",
    "prompt is too long",
    "input is too large",
];

/// Detail string recorded when the static fallback level was reached.
pub const STATIC_FALLBACK_DETAIL: &str = "overflow_static_fallback";

/// Classify an error as overflow from its rendered text.
///
/// Heuristic by necessity: the generation capability provides no structured
/// error code. The matching lives behind this one function so it can be
/// swapped without touching retry logic.
pub fn is_overflow_error(err: &anyhow::Error) -> bool {
    let text = format!("{:#}", err).to_lowercase();
    OVERFLOW_MARKERS.iter().any(|marker| text.contains(marker))
}

/// The ladder level that produced a stage's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLevel {
    /// First attempt at the full budget
    Initial,
    /// Halved budget, fallback sections forced
    HalvedBudget,
    /// Reduced tool set at a quarter budget
    ReducedTools,
    /// Static summary assembled from in-process data, no external call
    StaticFallback,
}

/// Output of a stage generation run.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub text: String,
    pub level: RetryLevel,
    /// Whether the successful attempt's payload was trimmed
    pub trimmed: bool,
    /// Whether fallback content replaced any section
    pub fallback_used: bool,
}

impl GenerationOutcome {
    /// Whether the static fallback level was reached.
    pub fn is_static_fallback(&self) -> bool {
        self.level == RetryLevel::StaticFallback
    }
}

/// Wraps one generation call per stage with the overflow retry ladder.
pub struct OverflowRetryController<'a> {
    assembler: &'a SectionAssembler,
    generator: &'a dyn Generator,
    tools: Vec<String>,
    reduced_tools: Vec<String>,
}

impl<'a> OverflowRetryController<'a> {
    /// Create a controller. `tools` is offered on the first two levels,
    /// `reduced_tools` on the third.
    pub fn new(
        assembler: &'a SectionAssembler,
        generator: &'a dyn Generator,
        tools: Vec<String>,
        reduced_tools: Vec<String>,
    ) -> Self {
        Self {
            assembler,
            generator,
            tools,
            reduced_tools,
        }
    }

    /// Run one stage generation through the ladder.
    ///
    /// `static_summary` supplies the terminal fallback text from data the
    /// pipeline already holds; it is invoked only if every generation
    /// attempt overflowed.
    pub fn run<F>(
        &self,
        stage: StageId,
        system_prompt: &str,
        sections: &[Section],
        budget: u64,
        fallbacks: Option<&HashMap<String, String>>,
        static_summary: F,
    ) -> Result<GenerationOutcome>
    where
        F: FnOnce() -> String,
    {
        let assembled = self.assembler.assemble(sections, budget, fallbacks, false);
        match self
            .generator
            .generate(system_prompt, &self.tools, &assembled.payload)
        {
            Ok(text) => {
                return Ok(GenerationOutcome {
                    text,
                    level: RetryLevel::Initial,
                    trimmed: assembled.trimmed,
                    fallback_used: assembled.fallback_used,
                });
            }
            Err(err) if is_overflow_error(&err) => {
                warn!(
                    stage = %stage,
                    budget,
                    error = %err,
                    "generation overflowed, retrying at half budget with fallback sections"
                );
            }
            Err(err) => return Err(err),
        }

        let halved = budget / 2;
        let assembled = self
            .assembler
            .assemble(sections, halved, fallbacks, fallbacks.is_some());
        match self
            .generator
            .generate(system_prompt, &self.tools, &assembled.payload)
        {
            Ok(text) => {
                return Ok(GenerationOutcome {
                    text,
                    level: RetryLevel::HalvedBudget,
                    trimmed: assembled.trimmed,
                    fallback_used: assembled.fallback_used,
                });
            }
            Err(err) if is_overflow_error(&err) => {
                warn!(
                    stage = %stage,
                    budget = halved,
                    error = %err,
                    "generation overflowed again, retrying with reduced tool set"
                );
            }
            Err(err) => return Err(err),
        }

        let quartered = budget / 4;
        let assembled = self
            .assembler
            .assemble(sections, quartered, fallbacks, fallbacks.is_some());
        match self
            .generator
            .generate(system_prompt, &self.reduced_tools, &assembled.payload)
        {
            Ok(text) => {
                return Ok(GenerationOutcome {
                    text,
                    level: RetryLevel::ReducedTools,
                    trimmed: assembled.trimmed,
                    fallback_used: assembled.fallback_used,
                });
            }
            Err(err) if is_overflow_error(&err) => {
                warn!(
                    stage = %stage,
                    budget = quartered,
                    error = %err,
                    "all generation attempts overflowed, assembling static summary"
                );
            }
            Err(err) => return Err(err),
        }

        Ok(GenerationOutcome {
            text: static_summary(),
            level: RetryLevel::StaticFallback,
            trimmed: true,
            fallback_used: assembled.fallback_used,
        })
    }
}
