use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use productify_ai::AgentKind;
use productify_auth::authorize_feature;
use productify_core::{JobId, ProjectId};
use productify_infra::jobs::JobStatus;

use crate::app::{dto, errors, services, services::AppServices};
use crate::context::UserContext;

/// GET /agents
pub async fn catalog(Extension(ctx): Extension<UserContext>) -> Response {
    let agents: Vec<_> = AgentKind::ALL
        .into_iter()
        .map(|a| dto::agent_to_json(a, ctx.plan()))
        .collect();
    Json(agents).into_response()
}

/// POST /agents/run
///
/// 202 with the queued job, or 402 when the balance cannot cover the estimate.
pub async fn run_agent(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Json(body): Json<dto::RunAgentRequest>,
) -> Response {
    let agent = match AgentKind::from_str(&body.agent) {
        Ok(agent) => agent,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "unknown_agent", e.to_string()),
    };
    if let Err(e) = authorize_feature(ctx.plan(), agent.required_feature()) {
        return errors::gate_error_to_response(&e, &services.config.upgrade_url);
    }
    let project_id = match body.project_id.as_deref().map(ProjectId::from_str).transpose() {
        Ok(id) => id,
        Err(_) => {
            return errors::invalid_id("project", body.project_id.as_deref().unwrap_or_default());
        }
    };

    match services
        .runner
        .run(ctx.user_id(), &body.agent, body.input, project_id)
        .await
    {
        Ok(outcome) if outcome.status == JobStatus::Failed => {
            (StatusCode::PAYMENT_REQUIRED, Json(outcome)).into_response()
        }
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(e) => errors::runner_error_to_response(e),
    }
}

/// GET /agents/jobs?limit=
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Query(q): Query<dto::LimitQuery>,
) -> Response {
    match services.runner.list_jobs(ctx.user_id(), q.resolve()).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => errors::runner_error_to_response(e),
    }
}

/// GET /agents/jobs/:id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
) -> Response {
    let Ok(job_id) = JobId::from_str(&id) else {
        return errors::invalid_id("job", &id);
    };
    match services.runner.get_job_status(ctx.user_id(), job_id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::runner_error_to_response(e),
    }
}

/// POST /agents/jobs/:id/cancel
pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
) -> Response {
    let Ok(job_id) = JobId::from_str(&id) else {
        return errors::invalid_id("job", &id);
    };
    match services.runner.cancel_job(ctx.user_id(), job_id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::runner_error_to_response(e),
    }
}

/// GET /agents/stream
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
) -> Response {
    services::user_job_stream(services, ctx.user_id()).into_response()
}
