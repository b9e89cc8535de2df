//! Consistent JSON error responses.
//!
//! Every error body is `{ "error": <snake_case code>, "message": ... }`; each
//! domain error type has exactly one mapping function below.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use productify_auth::{GateError, explain_gate};
use productify_infra::StoreError;
use productify_infra::render::RenderError;
use productify_infra::runner::RunnerError;
use productify_infra::users::CreditError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> Response {
    match err {
        StoreError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        StoreError::AlreadyExists(msg) => json_error(StatusCode::CONFLICT, "already_exists", msg),
        StoreError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "storage failure")
        }
    }
}

pub fn credit_error_to_response(err: CreditError) -> Response {
    match err {
        CreditError::Insufficient { .. } => {
            json_error(StatusCode::PAYMENT_REQUIRED, "insufficient_credits", err.to_string())
        }
        CreditError::UserNotFound => {
            json_error(StatusCode::NOT_FOUND, "user_not_found", err.to_string())
        }
        CreditError::InvalidAmount(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
        }
        CreditError::Store(e) => store_error_to_response(e),
    }
}

pub fn runner_error_to_response(err: RunnerError) -> Response {
    match err {
        RunnerError::UnknownAgent(e) => {
            json_error(StatusCode::BAD_REQUEST, "unknown_agent", e.to_string())
        }
        RunnerError::InvalidInput(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_input", msg),
        RunnerError::UserNotFound => {
            json_error(StatusCode::NOT_FOUND, "user_not_found", "user not found")
        }
        RunnerError::JobNotFound => json_error(StatusCode::NOT_FOUND, "job_not_found", "job not found"),
        RunnerError::JobAlreadyFinished { status } => json_error(
            StatusCode::CONFLICT,
            "job_already_finished",
            format!("job is already {status}"),
        ),
        RunnerError::Store(e) => store_error_to_response(e),
    }
}

pub fn render_error_to_response(err: RenderError) -> Response {
    match err {
        RenderError::ProjectNotFound => {
            json_error(StatusCode::NOT_FOUND, "project_not_found", err.to_string())
        }
        RenderError::AlreadyQueued(_) => {
            json_error(StatusCode::CONFLICT, "already_queued", err.to_string())
        }
        RenderError::Failed(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "render_failed", msg)
        }
        RenderError::Store(e) => store_error_to_response(e),
    }
}

/// 403 for a plan gate denial.
///
/// The volume guard reports `plan_limit_reached`; plan and feature checks
/// report `upgrade_required`.
pub fn gate_error_to_response(err: &GateError, upgrade_url: &str) -> Response {
    let code = match err {
        GateError::LimitReached { .. } => "plan_limit_reached",
        GateError::PlanTooLow { .. } | GateError::FeatureLocked { .. } => "upgrade_required",
    };
    let decision = explain_gate(err.current_plan(), &Err(err.clone()), upgrade_url);
    (
        StatusCode::FORBIDDEN,
        axum::Json(json!({
            "error": code,
            "message": decision.reason,
            "current_plan": decision.current_plan,
            "required_plan": decision.required_plan,
            "upgrade_url": decision.upgrade_url,
        })),
    )
        .into_response()
}

pub fn invalid_id(what: &str, raw: &str) -> Response {
    json_error(
        StatusCode::BAD_REQUEST,
        "invalid_id",
        format!("'{raw}' is not a valid {what} id"),
    )
}
