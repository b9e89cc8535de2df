use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Subscription tier stored on the user row.
///
/// Ordering follows the fixed hierarchy `free < plus < pro`; the derived
/// `Ord` and [`PlanTier::ordinal`] agree.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Plus,
    Pro,
}

impl PlanTier {
    pub const ALL: [PlanTier; 3] = [PlanTier::Free, PlanTier::Plus, PlanTier::Pro];

    /// Position in the plan hierarchy (`free: 0, plus: 1, pro: 2`).
    pub fn ordinal(&self) -> u8 {
        match self {
            PlanTier::Free => 0,
            PlanTier::Plus => 1,
            PlanTier::Pro => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Plus => "plus",
            PlanTier::Pro => "pro",
        }
    }

    pub fn limits(&self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits {
                max_active_jobs: 1,
                credit_grant: 10,
            },
            PlanTier::Plus => PlanLimits {
                max_active_jobs: 3,
                credit_grant: 200,
            },
            PlanTier::Pro => PlanLimits {
                max_active_jobs: 10,
                credit_grant: 1000,
            },
        }
    }
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

impl core::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown plan tier '{0}'")]
pub struct PlanParseError(pub String);

impl FromStr for PlanTier {
    type Err = PlanParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "plus" => Ok(PlanTier::Plus),
            "pro" => Ok(PlanTier::Pro),
            _ => Err(PlanParseError(s.to_string())),
        }
    }
}

/// Content-volume limits attached to a plan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    /// Queued + running agent jobs a user may have at once.
    pub max_active_jobs: usize,
    /// Credits granted at signup and on each refill.
    pub credit_grant: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_matches_hierarchy() {
        assert_eq!(PlanTier::Free.ordinal(), 0);
        assert_eq!(PlanTier::Plus.ordinal(), 1);
        assert_eq!(PlanTier::Pro.ordinal(), 2);
        assert!(PlanTier::Free < PlanTier::Plus && PlanTier::Plus < PlanTier::Pro);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("PRO".parse::<PlanTier>().unwrap(), PlanTier::Pro);
        assert_eq!(" plus ".parse::<PlanTier>().unwrap(), PlanTier::Plus);
        assert!("enterprise".parse::<PlanTier>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&PlanTier::Plus).unwrap();
        assert_eq!(json, "\"plus\"");
    }

    #[test]
    fn higher_plans_never_have_lower_limits() {
        for pair in PlanTier::ALL.windows(2) {
            let (lo, hi) = (pair[0].limits(), pair[1].limits());
            assert!(hi.max_active_jobs >= lo.max_active_jobs);
            assert!(hi.credit_grant >= lo.credit_grant);
        }
    }
}
