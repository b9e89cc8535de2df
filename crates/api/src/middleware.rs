//! Request-time user resolution and plan gates.
//!
//! Every gate delegates to `productify_auth::gate`, so the HTTP layer never
//! compares plans itself.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use productify_auth::{Feature, PlanTier, authorize_feature, authorize_plan, check_active_jobs};
use productify_core::UserId;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
struct UserIdQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Resolve the caller and insert a [`UserContext`].
///
/// Lookup order: `x-user-id` header, `userId` query parameter, then a
/// `Bearer <user-id>` session token.
pub async fn user_context_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(raw) = extract_user_id(&req) else {
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing user id");
    };
    let Ok(user_id) = UserId::from_str(&raw) else {
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid user id");
    };

    let user = match services.users.get(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return errors::json_error(StatusCode::NOT_FOUND, "user_not_found", "user not found");
        }
        Err(e) => return errors::store_error_to_response(e),
    };

    req.extensions_mut().insert(UserContext::new(user));
    next.run(req).await
}

fn extract_user_id(req: &Request) -> Option<String> {
    if let Some(id) = header_value(req.headers(), USER_ID_HEADER) {
        return Some(id);
    }
    if let Ok(Query(q)) = Query::<UserIdQuery>::try_from_uri(req.uri()) {
        if let Some(id) = q.user_id.filter(|s| !s.trim().is_empty()) {
            return Some(id.trim().to_string());
        }
    }
    header_value(req.headers(), header::AUTHORIZATION.as_str())
        .and_then(|h| h.strip_prefix("Bearer ").map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// State for [`require_plan`].
#[derive(Debug, Clone)]
pub struct PlanRequirement {
    pub min_plan: PlanTier,
    pub upgrade_url: Arc<str>,
}

impl PlanRequirement {
    pub fn new(min_plan: PlanTier, upgrade_url: &str) -> Self {
        Self {
            min_plan,
            upgrade_url: Arc::from(upgrade_url),
        }
    }
}

/// State for [`require_feature`].
#[derive(Debug, Clone)]
pub struct FeatureRequirement {
    pub feature: Feature,
    pub upgrade_url: Arc<str>,
}

impl FeatureRequirement {
    pub fn new(feature: Feature, upgrade_url: &str) -> Self {
        Self {
            feature,
            upgrade_url: Arc::from(upgrade_url),
        }
    }
}

/// Allow the request when the caller's plan is at least `min_plan`.
pub async fn require_plan(
    State(requirement): State<PlanRequirement>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ctx) = req.extensions().get::<UserContext>().cloned() else {
        return missing_context();
    };
    if let Err(e) = authorize_plan(ctx.plan(), requirement.min_plan) {
        tracing::info!(user_id = %ctx.user_id(), error = %e, "plan gate denied");
        return errors::gate_error_to_response(&e, &requirement.upgrade_url);
    }
    next.run(req).await
}

/// Allow the request when the caller's plan includes `feature`.
pub async fn require_feature(
    State(requirement): State<FeatureRequirement>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ctx) = req.extensions().get::<UserContext>().cloned() else {
        return missing_context();
    };
    if let Err(e) = authorize_feature(ctx.plan(), requirement.feature) {
        tracing::info!(user_id = %ctx.user_id(), error = %e, "feature gate denied");
        return errors::gate_error_to_response(&e, &requirement.upgrade_url);
    }
    next.run(req).await
}

/// Deny new agent runs once the caller has as many queued or running jobs as
/// their plan allows.
pub async fn active_job_guard(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ctx) = req.extensions().get::<UserContext>().cloned() else {
        return missing_context();
    };
    let active = match services.runner.active_jobs(ctx.user_id()).await {
        Ok(n) => n,
        Err(e) => return errors::runner_error_to_response(e),
    };
    if let Err(e) = check_active_jobs(ctx.plan(), active) {
        tracing::info!(user_id = %ctx.user_id(), active, "active job limit reached");
        return errors::gate_error_to_response(&e, &services.config.upgrade_url);
    }
    next.run(req).await
}

fn missing_context() -> Response {
    errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "user context missing")
}
