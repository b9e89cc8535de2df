use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    response::{IntoResponse, Response},
};
use serde_json::json;

use productify_infra::users::refill_credits;

use crate::app::{dto, errors, services::AppServices};
use crate::context::UserContext;

/// GET /credits
pub async fn balance(Extension(ctx): Extension<UserContext>) -> Response {
    let user = ctx.user();
    Json(json!({
        "balance": user.credits,
        "plan": user.plan,
    }))
    .into_response()
}

/// GET /credits/history?limit=
pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Query(q): Query<dto::LimitQuery>,
) -> Response {
    match services.users.history(ctx.user_id(), q.resolve()).await {
        Ok(rows) => Json(rows.iter().map(dto::transaction_to_json).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /credits/refill
///
/// Adds the plan's monthly grant.
pub async fn refill(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
) -> Response {
    match refill_credits(services.users.as_ref(), ctx.user_id()).await {
        Ok(balance) => Json(json!({ "balance": balance, "plan": ctx.plan() })).into_response(),
        Err(e) => errors::credit_error_to_response(e),
    }
}
