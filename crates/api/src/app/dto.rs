use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use productify_ai::AgentKind;
use productify_auth::{PlanTier, authorize_feature};
use productify_infra::users::{CreditTransaction, User};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub plan: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan: String,
}

#[derive(Debug, Deserialize)]
pub struct RunAgentRequest {
    pub agent: String,
    #[serde(default)]
    pub input: JsonValue,
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVideoProjectRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct PlanCheckQuery {
    pub plan: Option<String>,
    pub feature: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    /// Requested page size, defaulting to 50 and capped at 200.
    pub fn resolve(&self) -> usize {
        self.limit.unwrap_or(50).clamp(1, 200)
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn user_to_json(user: &User) -> JsonValue {
    json!({
        "id": user.id.to_string(),
        "email": user.email,
        "plan": user.plan,
        "credits": user.credits,
        "limits": {
            "max_active_jobs": user.plan.limits().max_active_jobs,
            "credit_grant": user.plan.limits().credit_grant,
        },
        "created_at": user.created_at.to_rfc3339(),
    })
}

pub fn transaction_to_json(t: &CreditTransaction) -> JsonValue {
    json!({
        "id": t.id.to_string(),
        "delta": t.delta,
        "balance_after": t.balance_after,
        "reason": t.reason.as_str(),
        "job_id": t.job_id.map(|j| j.to_string()),
        "created_at": t.created_at.to_rfc3339(),
    })
}

pub fn agent_to_json(agent: AgentKind, plan: PlanTier) -> JsonValue {
    json!({
        "name": agent.as_str(),
        "estimated_credits": agent.estimated_credits(),
        "feature": agent.required_feature().as_str(),
        "required_plan": agent.required_plan(),
        "available": authorize_feature(plan, agent.required_feature()).is_ok(),
    })
}
