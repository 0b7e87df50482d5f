//! Budget estimation and resolution for generation payloads.
//!
//! Text length is converted to an abstract consumption unit through a
//! language-sensitive characters-per-unit ratio. The estimate deliberately
//! overshoots (multiplier plus flat overhead) so a payload that passes the
//! budget check here does not silently exceed a downstream hard limit.
//!
//! How much of the total cap a given stage may consume is configuration,
//! not derived logic: each call site carries a `BudgetTuning` tuple that is
//! externally tunable (see `config::EngineConfig`).

use serde::{Deserialize, Serialize};

/// Characters per budget unit for dense scripts (CJK and similar).
pub const DENSE_CHARS_PER_UNIT: f64 = 1.6;

/// Characters per budget unit for everything else.
pub const STANDARD_CHARS_PER_UNIT: f64 = 3.5;

/// Overestimation multiplier applied to every estimate.
const ESTIMATE_MARGIN: f64 = 1.15;

/// Flat unit overhead added to every estimate.
const ESTIMATE_OVERHEAD: f64 = 8.0;

/// Language density profile of the content being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LanguageProfile {
    /// Dense scripts where one character carries roughly one unit (CJK)
    Dense,
    /// Alphabetic scripts averaging several characters per unit
    #[default]
    Standard,
}

impl LanguageProfile {
    /// The characters-per-unit ratio for this profile.
    pub fn chars_per_unit(&self) -> f64 {
        match self {
            LanguageProfile::Dense => DENSE_CHARS_PER_UNIT,
            LanguageProfile::Standard => STANDARD_CHARS_PER_UNIT,
        }
    }
}

/// Converts text length to estimated budget units.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetEstimator {
    profile: LanguageProfile,
}

impl BudgetEstimator {
    /// Create an estimator for the given language profile.
    pub fn new(profile: LanguageProfile) -> Self {
        Self { profile }
    }

    /// The active language profile.
    pub fn profile(&self) -> LanguageProfile {
        self.profile
    }

    /// The characters-per-unit ratio in effect.
    pub fn chars_per_unit(&self) -> f64 {
        self.profile.chars_per_unit()
    }

    /// Estimate the unit cost of a text.
    ///
    /// `ceil(chars / ratio) * 1.15 + 8`, rounded up. The margin and overhead
    /// are a deliberate overestimate.
    pub fn estimate(&self, text: &str) -> u64 {
        let chars = text.chars().count();
        let base = (chars as f64 / self.chars_per_unit()).ceil();
        (base * ESTIMATE_MARGIN + ESTIMATE_OVERHEAD).ceil() as u64
    }

    /// The character count representable within `units` at this ratio.
    ///
    /// Used by the terminal hard-truncate fallback, which bounds payload
    /// length rather than estimated cost.
    pub fn chars_for_units(&self, units: u64) -> usize {
        (units as f64 * self.chars_per_unit()).floor() as usize
    }
}

/// Per-call-site budget shaping: how much of the total cap a stage may use.
///
/// All four fields are unit counts. `resolve` applies them to an optional
/// cap hint supplied by the caller (explicit argument or global fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetTuning {
    /// Units subtracted from the cap hint before use
    pub reserve: u64,
    /// Floor on the resolved budget
    pub minimum: u64,
    /// Budget used when no cap hint is available from any source
    pub default: u64,
    /// Ceiling on the resolved budget
    pub hard_cap: u64,
}

impl BudgetTuning {
    /// Create a tuning tuple.
    pub fn new(reserve: u64, minimum: u64, default: u64, hard_cap: u64) -> Self {
        Self {
            reserve,
            minimum,
            default,
            hard_cap,
        }
    }

    /// Validate internal consistency. Used when loading configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.minimum > self.hard_cap {
            return Err(format!(
                "minimum {} exceeds hard cap {}",
                self.minimum, self.hard_cap
            ));
        }
        if self.hard_cap == 0 {
            return Err("hard cap must be positive".to_string());
        }
        Ok(())
    }

    /// Resolve the usable unit budget from an optional cap hint.
    ///
    /// With no hint the default applies; otherwise the reserve is taken off
    /// the hint. Either way the result is clamped to `[minimum, hard_cap]`.
    pub fn resolve(&self, cap_hint: Option<u64>) -> u64 {
        let raw = match cap_hint {
            None => self.default,
            Some(cap) => cap.saturating_sub(self.reserve),
        };
        raw.min(self.hard_cap).max(self.minimum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_empty_text() {
        let est = BudgetEstimator::new(LanguageProfile::Standard);
        // Zero characters still pay the flat overhead
        assert_eq!(est.estimate(""), 8);
    }

    #[test]
    fn test_estimate_standard_profile() {
        let est = BudgetEstimator::new(LanguageProfile::Standard);
        // 350 chars / 3.5 = 100 units, * 1.15 + 8 = 123
        let text = "x".repeat(350);
        assert_eq!(est.estimate(&text), 123);
    }

    #[test]
    fn test_estimate_dense_profile() {
        let est = BudgetEstimator::new(LanguageProfile::Dense);
        // 160 chars / 1.6 = 100 units, * 1.15 + 8 = 123
        let text = "字".repeat(160);
        assert_eq!(est.estimate(&text), 123);
    }

    #[test]
    fn test_estimate_overshoots_plain_ratio() {
        let est = BudgetEstimator::new(LanguageProfile::Standard);
        let text = "y".repeat(7_000);
        let plain = (7_000f64 / STANDARD_CHARS_PER_UNIT).ceil() as u64;
        assert!(est.estimate(&text) > plain);
    }

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        let est = BudgetEstimator::new(LanguageProfile::Standard);
        let ascii = "a".repeat(70);
        let multibyte = "é".repeat(70);
        assert_eq!(est.estimate(&ascii), est.estimate(&multibyte));
    }

    #[test]
    fn test_chars_for_units() {
        let est = BudgetEstimator::new(LanguageProfile::Standard);
        assert_eq!(est.chars_for_units(2_000), 7_000);

        let dense = BudgetEstimator::new(LanguageProfile::Dense);
        assert_eq!(dense.chars_for_units(1_000), 1_600);
    }

    #[test]
    fn test_resolve_without_hint_uses_default() {
        let tuning = BudgetTuning::new(500, 1_000, 8_000, 30_000);
        assert_eq!(tuning.resolve(None), 8_000);
    }

    #[test]
    fn test_resolve_without_hint_clamps_default() {
        let tuning = BudgetTuning::new(0, 1_000, 50_000, 30_000);
        assert_eq!(tuning.resolve(None), 30_000);

        let tuning = BudgetTuning::new(0, 1_000, 10, 30_000);
        assert_eq!(tuning.resolve(None), 1_000);
    }

    #[test]
    fn test_resolve_with_hint_subtracts_reserve() {
        let tuning = BudgetTuning::new(500, 1_000, 8_000, 30_000);
        assert_eq!(tuning.resolve(Some(10_000)), 9_500);
    }

    #[test]
    fn test_resolve_with_hint_clamps() {
        let tuning = BudgetTuning::new(500, 1_000, 8_000, 30_000);
        // Hint below minimum after reserve
        assert_eq!(tuning.resolve(Some(600)), 1_000);
        // Hint above hard cap
        assert_eq!(tuning.resolve(Some(1_000_000)), 30_000);
        // Reserve larger than hint saturates to zero, then floors at minimum
        assert_eq!(tuning.resolve(Some(100)), 1_000);
    }

    #[test]
    fn test_validate() {
        assert!(BudgetTuning::new(0, 100, 500, 1_000).validate().is_ok());
        assert!(BudgetTuning::new(0, 2_000, 500, 1_000).validate().is_err());
        assert!(BudgetTuning::new(0, 0, 0, 0).validate().is_err());
    }

    #[test]
    fn test_language_profile_serde() {
        let json = serde_json::to_string(&LanguageProfile::Dense).unwrap();
        assert_eq!(json, "\"dense\"");
        let parsed: LanguageProfile = serde_json::from_str("\"standard\"").unwrap();
        assert_eq!(parsed, LanguageProfile::Standard);
    }
}
