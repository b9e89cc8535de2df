use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use productify_auth::{Feature, PlanTier, authorize_feature, authorize_plan, explain_gate};
use productify_infra::users::register_user;

use crate::app::{dto, errors, services::AppServices};
use crate::context::UserContext;

/// POST /users
pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateUserRequest>,
) -> Response {
    let email = body.email.trim();
    if email.is_empty() || !email.contains('@') {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "email must be a valid address",
        );
    }
    let plan = match body.plan.as_deref().map(PlanTier::from_str).transpose() {
        Ok(plan) => plan.unwrap_or_default(),
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_plan", e.to_string()),
    };

    match register_user(services.users.as_ref(), email, plan).await {
        Ok(user) => (StatusCode::CREATED, Json(dto::user_to_json(&user))).into_response(),
        Err(e) => errors::credit_error_to_response(e),
    }
}

/// GET /me
pub async fn me(Extension(ctx): Extension<UserContext>) -> Response {
    Json(dto::user_to_json(ctx.user())).into_response()
}

/// POST /me/plan
///
/// Overwrites the plan, as the billing webhook does. No proration.
pub async fn change_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Json(body): Json<dto::ChangePlanRequest>,
) -> Response {
    let plan = match PlanTier::from_str(&body.plan) {
        Ok(plan) => plan,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_plan", e.to_string()),
    };
    match services.users.set_plan(ctx.user_id(), plan).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, from = %ctx.plan(), to = %plan, "plan changed");
            Json(dto::user_to_json(&user)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /plan/check?plan=&feature=
///
/// Explains whether the caller passes a plan or feature gate without
/// hitting the gated route.
pub async fn plan_check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Query(q): Query<dto::PlanCheckQuery>,
) -> Response {
    let result = match (q.plan.as_deref(), q.feature.as_deref()) {
        (Some(plan), None) => match PlanTier::from_str(plan) {
            Ok(min) => authorize_plan(ctx.plan(), min),
            Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_plan", e.to_string()),
        },
        (None, Some(feature)) => match Feature::parse(feature) {
            Some(feature) => authorize_feature(ctx.plan(), feature),
            None => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_feature",
                    format!("unknown feature '{feature}'"),
                );
            }
        },
        _ => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "pass exactly one of 'plan' or 'feature'",
            );
        }
    };
    Json(explain_gate(ctx.plan(), &result, &services.config.upgrade_url)).into_response()
}
