//! Section assembly: composing labeled content into a budgeted payload.
//!
//! Stages feed heterogeneous inputs (briefing, plan, evidence, prior drafts)
//! into one generation call. Each input arrives as a `Section` with a
//! priority and optional size caps; the assembler concatenates them and,
//! when the estimated unit cost exceeds the budget, degrades content along
//! a priority-tiered shrink ladder. Least-important content is sacrificed
//! first, and within a priority tier larger cuts are tried only after
//! smaller cuts fail. The terminal fallback hard-truncates the whole
//! payload so assembly always terminates.
//!
//! The assembler never mutates its inputs, so a caller can re-run it across
//! overflow retries with identical results.

use crate::budget::BudgetEstimator;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Default floor below which a section is never shrunk.
pub const DEFAULT_MIN_CHARS: usize = 200;

/// Shrink ratios tried within each priority tier, smallest cut first.
const SHRINK_RATIOS: [f64; 3] = [0.7, 0.5, 0.35];

/// Relative importance of a section when the budget forces cuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SectionPriority {
    /// Sacrificed first
    Low,
    #[default]
    Medium,
    /// Touched only when everything else was not enough
    High,
}

/// One labeled input to a stage payload.
#[derive(Debug, Clone)]
pub struct Section {
    /// Identifier, also the lookup key into a fallback map
    pub key: String,
    /// Optional heading emitted above the content
    pub header: Option<String>,
    /// The content itself
    pub content: String,
    /// Shrink-ladder tier
    pub priority: SectionPriority,
    /// Cap applied before any budget pressure (ratio 1.0)
    pub base_limit: Option<usize>,
    /// Floor below which the ladder never cuts
    pub min_chars: usize,
    /// Line cap applied before length limiting
    pub max_lines: Option<usize>,
}

impl Section {
    /// Create a section with default priority and floor.
    pub fn new(key: &str, content: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            header: None,
            content: content.into(),
            priority: SectionPriority::default(),
            base_limit: None,
            min_chars: DEFAULT_MIN_CHARS,
            max_lines: None,
        }
    }

    /// Set the heading emitted above the content.
    pub fn with_header(mut self, header: &str) -> Self {
        self.header = Some(header.to_string());
        self
    }

    /// Set the shrink-ladder tier.
    pub fn with_priority(mut self, priority: SectionPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the base character limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.base_limit = Some(limit);
        self
    }

    /// Set the shrink floor.
    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    /// Cap the number of lines kept before length limiting.
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = Some(max_lines);
        self
    }
}

/// Result of assembling sections against a budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    /// The payload to hand to the generation capability
    pub payload: String,
    /// Whether any shrink or truncation was applied
    pub trimmed: bool,
    /// Whether fallback content replaced any section
    pub fallback_used: bool,
}

/// Working copy of a section during one assemble call. `content` is the
/// prepared, pre-shrink text; shrinking always truncates from it so rungs
/// stay independent of each other.
struct Prepared {
    header: Option<String>,
    content: String,
    priority: SectionPriority,
    base_limit: Option<usize>,
    min_chars: usize,
    applied_limit: Option<usize>,
}

impl Prepared {
    fn from_section(
        section: &Section,
        fallbacks: Option<&HashMap<String, String>>,
        use_fallback: bool,
    ) -> Self {
        let raw = if use_fallback {
            fallbacks
                .and_then(|map| map.get(&section.key))
                .cloned()
                .unwrap_or_else(|| section.content.clone())
        } else {
            section.content.clone()
        };

        let mut content = match section.max_lines {
            Some(max) => raw.lines().take(max).collect::<Vec<_>>().join("\n"),
            None => raw,
        };
        if let Some(limit) = section.base_limit {
            content = truncate_chars(&content, limit);
        }

        Self {
            header: section.header.clone(),
            content,
            priority: section.priority,
            base_limit: section.base_limit,
            min_chars: section.min_chars,
            applied_limit: None,
        }
    }

    /// The length the shrink ratio applies to: the base limit when set,
    /// otherwise the prepared content length.
    fn effective_limit(&self) -> usize {
        self.base_limit
            .unwrap_or_else(|| self.content.chars().count())
    }

    fn rendered(&self) -> Option<String> {
        let content = match self.applied_limit {
            Some(limit) => truncate_chars(&self.content, limit),
            None => self.content.clone(),
        };
        if content.is_empty() {
            return None;
        }
        Some(match &self.header {
            Some(header) => format!("{}\n{}", header, content),
            None => content,
        })
    }
}

/// Assembles sections into a payload honoring a unit budget.
#[derive(Debug, Clone, Copy)]
pub struct SectionAssembler {
    estimator: BudgetEstimator,
}

impl SectionAssembler {
    /// Create an assembler over the given estimator.
    pub fn new(estimator: BudgetEstimator) -> Self {
        Self { estimator }
    }

    /// The estimator in use.
    pub fn estimator(&self) -> &BudgetEstimator {
        &self.estimator
    }

    /// Assemble sections into one payload whose estimated cost fits the
    /// budget.
    ///
    /// Sections are concatenated in input order with blank-line separation,
    /// empty ones dropped. If the estimate exceeds the budget the assembler
    /// first substitutes fallback content (once), then walks the shrink
    /// ladder low → medium → high at ratios 0.7 → 0.5 → 0.35, and finally
    /// hard-truncates the whole payload to `budget × chars_per_unit`
    /// characters, keeping head and tail.
    ///
    /// The returned payload satisfies `estimate(payload) <= budget` except
    /// on the terminal path, which instead guarantees the character bound.
    pub fn assemble(
        &self,
        sections: &[Section],
        budget: u64,
        fallbacks: Option<&HashMap<String, String>>,
        force_fallback: bool,
    ) -> Assembled {
        let mut fallback_used = force_fallback && fallbacks.is_some();
        let mut prepared: Vec<Prepared> = sections
            .iter()
            .map(|s| Prepared::from_section(s, fallbacks, fallback_used))
            .collect();

        let payload = join(&prepared);
        if self.estimator.estimate(&payload) <= budget {
            return Assembled {
                payload,
                trimmed: false,
                fallback_used,
            };
        }

        // One fallback retry before any shrinking.
        if !fallback_used && fallbacks.is_some() {
            debug!(budget, "payload over budget, retrying with fallback sections");
            fallback_used = true;
            prepared = sections
                .iter()
                .map(|s| Prepared::from_section(s, fallbacks, true))
                .collect();
            let payload = join(&prepared);
            if self.estimator.estimate(&payload) <= budget {
                return Assembled {
                    payload,
                    trimmed: false,
                    fallback_used,
                };
            }
        }

        // Shrink ladder. Cuts applied to a tier persist while later tiers
        // are tried.
        for tier in [
            SectionPriority::Low,
            SectionPriority::Medium,
            SectionPriority::High,
        ] {
            for ratio in SHRINK_RATIOS {
                let mut touched = false;
                for p in prepared.iter_mut().filter(|p| p.priority == tier) {
                    let target = ((p.effective_limit() as f64 * ratio).round() as usize)
                        .max(p.min_chars);
                    p.applied_limit = Some(target);
                    touched = true;
                }
                if !touched {
                    break;
                }
                let payload = join(&prepared);
                if self.estimator.estimate(&payload) <= budget {
                    debug!(?tier, ratio, budget, "shrink ladder satisfied budget");
                    return Assembled {
                        payload,
                        trimmed: true,
                        fallback_used,
                    };
                }
            }
        }

        // Terminal fallback: bound the payload by characters instead of
        // estimated units. Always terminates.
        let max_chars = self.estimator.chars_for_units(budget);
        let payload = head_tail_truncate(&join(&prepared), max_chars);
        warn!(
            budget,
            max_chars, "shrink ladder exhausted, hard-truncating assembled payload"
        );
        Assembled {
            payload,
            trimmed: true,
            fallback_used,
        }
    }
}

fn join(prepared: &[Prepared]) -> String {
    prepared
        .iter()
        .filter_map(Prepared::rendered)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Truncate to at most `max_chars` characters on a char boundary.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

/// Keep the head and tail of `s`, collapsing the middle, so the result has
/// at most `max_chars` characters.
fn head_tail_truncate(s: &str, max_chars: usize) -> String {
    const MARKER: &str = "\n[...]\n";
    let total = s.chars().count();
    if total <= max_chars {
        return s.to_string();
    }
    let marker_len = MARKER.chars().count();
    if max_chars <= marker_len {
        return s.chars().take(max_chars).collect();
    }
    let keep = max_chars - marker_len;
    let head = keep * 6 / 10;
    let tail = keep - head;
    let head_part: String = s.chars().take(head).collect();
    let tail_part: String = s
        .chars()
        .skip(total.saturating_sub(tail))
        .collect();
    format!("{}{}{}", head_part, MARKER, tail_part)
}
