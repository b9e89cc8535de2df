//! `productify-auth`: subscription plans and the plan gate.
//!
//! Pure policy: no HTTP, no storage. The API layer resolves the caller's plan
//! and asks this crate whether the request may proceed.

pub mod feature;
pub mod gate;
pub mod plan;

pub use feature::Feature;
pub use gate::{
    authorize_feature, authorize_plan, check_active_jobs, explain_gate, GateDecision, GateError,
};
pub use plan::{PlanLimits, PlanParseError, PlanTier};
