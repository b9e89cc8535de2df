//! Plan gate decisions.
//!
//! Every HTTP guard (minimum plan, feature, active-job volume) goes through
//! the functions here so the rules exist exactly once.

use serde::Serialize;
use thiserror::Error;

use crate::{Feature, PlanTier};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("plan '{current}' is below required plan '{required}'")]
    PlanTooLow {
        current: PlanTier,
        required: PlanTier,
    },

    #[error("feature '{feature}' requires plan '{required}' (current: '{current}')")]
    FeatureLocked {
        feature: Feature,
        current: PlanTier,
        required: PlanTier,
    },

    #[error("plan '{current}' allows {limit} active job(s); {active} already active")]
    LimitReached {
        current: PlanTier,
        limit: usize,
        active: usize,
    },
}

impl GateError {
    pub fn current_plan(&self) -> PlanTier {
        match self {
            GateError::PlanTooLow { current, .. }
            | GateError::FeatureLocked { current, .. }
            | GateError::LimitReached { current, .. } => *current,
        }
    }

    /// The plan the caller would need; `None` when already on the top tier.
    pub fn required_plan(&self) -> Option<PlanTier> {
        match self {
            GateError::PlanTooLow { required, .. } | GateError::FeatureLocked { required, .. } => {
                Some(*required)
            }
            GateError::LimitReached { current, .. } => next_plan(*current),
        }
    }
}

/// Allow when `user_plan` is at or above `min_plan` in the hierarchy.
pub fn authorize_plan(user_plan: PlanTier, min_plan: PlanTier) -> Result<(), GateError> {
    if user_plan.ordinal() < min_plan.ordinal() {
        return Err(GateError::PlanTooLow {
            current: user_plan,
            required: min_plan,
        });
    }
    Ok(())
}

pub fn authorize_feature(user_plan: PlanTier, feature: Feature) -> Result<(), GateError> {
    let required = feature.min_plan();
    if user_plan.ordinal() < required.ordinal() {
        return Err(GateError::FeatureLocked {
            feature,
            current: user_plan,
            required,
        });
    }
    Ok(())
}

/// Volume guard: deny once `active` reaches the plan's active-job limit.
pub fn check_active_jobs(user_plan: PlanTier, active: usize) -> Result<(), GateError> {
    let limit = user_plan.limits().max_active_jobs;
    if active >= limit {
        return Err(GateError::LimitReached {
            current: user_plan,
            limit,
            active,
        });
    }
    Ok(())
}

fn next_plan(plan: PlanTier) -> Option<PlanTier> {
    match plan {
        PlanTier::Free => Some(PlanTier::Plus),
        PlanTier::Plus => Some(PlanTier::Pro),
        PlanTier::Pro => None,
    }
}

/// Client-facing explanation of a gate outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub current_plan: PlanTier,
    pub required_plan: Option<PlanTier>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_url: Option<String>,
}

/// Turn a gate result into a [`GateDecision`].
///
/// `upgrade_url` is attached only to denials that an upgrade would fix.
pub fn explain_gate(
    user_plan: PlanTier,
    result: &Result<(), GateError>,
    upgrade_url: &str,
) -> GateDecision {
    match result {
        Ok(()) => GateDecision {
            allowed: true,
            current_plan: user_plan,
            required_plan: None,
            reason: format!("plan '{user_plan}' satisfies the requirement"),
            upgrade_url: None,
        },
        Err(e) => {
            let required_plan = e.required_plan();
            GateDecision {
                allowed: false,
                current_plan: e.current_plan(),
                required_plan,
                reason: e.to_string(),
                upgrade_url: required_plan.map(|_| upgrade_url.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_plan() -> impl Strategy<Value = PlanTier> {
        prop_oneof![Just(PlanTier::Free), Just(PlanTier::Plus), Just(PlanTier::Pro)]
    }

    #[test]
    fn all_nine_plan_pairs() {
        for user in PlanTier::ALL {
            for min in PlanTier::ALL {
                let denied = authorize_plan(user, min).is_err();
                assert_eq!(
                    denied,
                    user.ordinal() < min.ordinal(),
                    "user={user} min={min}"
                );
            }
        }
    }

    #[test]
    fn video_render_requires_pro() {
        assert!(authorize_feature(PlanTier::Plus, Feature::VideoRender).is_err());
        assert!(authorize_feature(PlanTier::Pro, Feature::VideoRender).is_ok());
        assert!(authorize_feature(PlanTier::Free, Feature::AiWriter).is_ok());
    }

    #[test]
    fn free_plan_allows_one_active_job() {
        assert!(check_active_jobs(PlanTier::Free, 0).is_ok());
        let err = check_active_jobs(PlanTier::Free, 1).unwrap_err();
        assert_eq!(err.required_plan(), Some(PlanTier::Plus));
    }

    #[test]
    fn pro_limit_has_no_upgrade_hint() {
        let result = check_active_jobs(PlanTier::Pro, 10);
        let decision = explain_gate(PlanTier::Pro, &result, "/pricing");
        assert!(!decision.allowed);
        assert_eq!(decision.required_plan, None);
        assert_eq!(decision.upgrade_url, None);
    }

    #[test]
    fn denial_carries_upgrade_url() {
        let result = authorize_plan(PlanTier::Free, PlanTier::Pro);
        let decision = explain_gate(PlanTier::Free, &result, "/pricing");
        assert!(!decision.allowed);
        assert_eq!(decision.required_plan, Some(PlanTier::Pro));
        assert_eq!(decision.upgrade_url.as_deref(), Some("/pricing"));
    }

    proptest! {
        #[test]
        fn feature_gate_agrees_with_plan_gate(user in any_plan()) {
            for feature in [Feature::AiWriter, Feature::ImageGeneration, Feature::VideoRender] {
                prop_assert_eq!(
                    authorize_feature(user, feature).is_ok(),
                    authorize_plan(user, feature.min_plan()).is_ok()
                );
            }
        }

        #[test]
        fn upgrading_never_revokes_access(user in any_plan(), min in any_plan()) {
            if authorize_plan(user, min).is_ok() {
                for higher in PlanTier::ALL.into_iter().filter(|p| *p >= user) {
                    prop_assert!(authorize_plan(higher, min).is_ok());
                }
            }
        }
    }
}
