//! Top-level bundle planning for multi-pass execution.
//!
//! A single pass suffices when the caller's top-level request already
//! respects the canonical bundle order. When two or more requested bundles
//! are out of their canonical relative order, the runner executes one pass
//! per bundle in topological order, restricting each pass to that bundle's
//! members and threading accumulated state forward.

use crate::stage::BundleId;
use std::collections::BTreeSet;
use tracing::debug;

/// Whether a top-level request requires multi-pass execution.
///
/// True when at least two distinct bundles are requested and their order
/// differs from the canonical relative order.
pub fn needs_multipass(requested: &[BundleId]) -> bool {
    let distinct: BTreeSet<BundleId> = requested.iter().copied().collect();
    if distinct.len() < 2 {
        return false;
    }
    requested
        .windows(2)
        .any(|w| w[0].canonical_index() > w[1].canonical_index())
}

/// Topologically order the requested bundles against the top-level
/// dependency table.
///
/// Only edges between requested bundles gate the order; a dependency on an
/// unrequested bundle is ignored. Ties break toward canonical order, and
/// duplicates collapse to one occurrence.
pub fn toplevel_plan(requested: &[BundleId]) -> Vec<BundleId> {
    let wanted: BTreeSet<BundleId> = requested.iter().copied().collect();

    let mut ordered = Vec::with_capacity(wanted.len());
    let mut placed: BTreeSet<BundleId> = BTreeSet::new();

    while ordered.len() < wanted.len() {
        let next = BundleId::ALL.iter().copied().find(|b| {
            wanted.contains(b)
                && !placed.contains(b)
                && b.dependencies()
                    .iter()
                    .all(|d| !wanted.contains(d) || placed.contains(d))
        });
        match next {
            Some(bundle) => {
                placed.insert(bundle);
                ordered.push(bundle);
            }
            None => break,
        }
    }

    if ordered.as_slice() != requested {
        debug!(
            requested = ?requested.iter().map(|b| b.name()).collect::<Vec<_>>(),
            planned = ?ordered.iter().map(|b| b.name()).collect::<Vec<_>>(),
            "top-level request reordered for execution"
        );
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_bundle_never_multipass() {
        assert!(!needs_multipass(&[BundleId::Draft]));
        assert!(!needs_multipass(&[]));
    }

    #[test]
    fn test_in_order_request_never_multipass() {
        assert!(!needs_multipass(&[BundleId::Research, BundleId::Draft]));
        assert!(!needs_multipass(&[
            BundleId::Research,
            BundleId::Draft,
            BundleId::Review
        ]));
        // Gaps in the canonical order are fine
        assert!(!needs_multipass(&[BundleId::Research, BundleId::Review]));
    }

    #[test]
    fn test_out_of_order_request_needs_multipass() {
        assert!(needs_multipass(&[BundleId::Draft, BundleId::Research]));
        assert!(needs_multipass(&[
            BundleId::Review,
            BundleId::Research,
            BundleId::Draft
        ]));
    }

    #[test]
    fn test_repeated_single_bundle_not_multipass() {
        assert!(!needs_multipass(&[BundleId::Draft, BundleId::Draft]));
    }

    #[test]
    fn test_toplevel_plan_orders_by_dependency() {
        let plan = toplevel_plan(&[BundleId::Draft, BundleId::Research]);
        assert_eq!(plan, vec![BundleId::Research, BundleId::Draft]);

        let plan = toplevel_plan(&[BundleId::Review, BundleId::Research, BundleId::Draft]);
        assert_eq!(
            plan,
            vec![BundleId::Research, BundleId::Draft, BundleId::Review]
        );
    }

    #[test]
    fn test_toplevel_plan_ignores_unrequested_dependencies() {
        // Review depends on draft, but draft is not requested
        let plan = toplevel_plan(&[BundleId::Review, BundleId::Research]);
        assert_eq!(plan, vec![BundleId::Research, BundleId::Review]);
    }

    #[test]
    fn test_toplevel_plan_deduplicates() {
        let plan = toplevel_plan(&[BundleId::Draft, BundleId::Draft, BundleId::Research]);
        assert_eq!(plan, vec![BundleId::Research, BundleId::Draft]);
    }
}
