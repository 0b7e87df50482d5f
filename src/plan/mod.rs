//! Execution planning for the kiln pipeline.
//!
//! This module turns a caller's stage request into an ordered, duplicate-free
//! execution plan:
//!
//! 1. **Planner** - Resolves the enabled stage set (inclusion, exclusion,
//!    dependency closure) and orders it consistently with the stage graph
//! 2. **Toplevel** - Decides when a request needs multi-pass execution and
//!    topologically orders the requested top-level bundles
//!
//! ## Example
//!
//! ```
//! use kiln::plan::{ExecutionPlanner, PlanRequest};
//! use kiln::stage::StageId;
//!
//! // Requesting the writer pulls in its full dependency chain.
//! let request = PlanRequest::from_names(&["writer"], &[], false);
//! let plan = ExecutionPlanner::plan(&request);
//!
//! assert_eq!(
//!     plan.stages,
//!     vec![StageId::Scout, StageId::Plan, StageId::Evidence, StageId::Writer]
//! );
//! ```

mod planner;
mod toplevel;

pub use planner::{ExecutionPlan, ExecutionPlanner, PlanRequest};
pub use toplevel::{needs_multipass, toplevel_plan};
