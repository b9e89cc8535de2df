use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use productify_core::ProjectId;
use productify_infra::render::VideoProject;

use crate::app::{dto, errors, services::AppServices};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/projects", post(create_project).get(list_projects))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/render", post(render_project))
        .route("/queue", get(queue_status))
}

/// POST /video/projects
pub async fn create_project(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Json(body): Json<dto::CreateVideoProjectRequest>,
) -> Response {
    let title = body.title.trim();
    if title.is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "title is required");
    }
    let project = VideoProject::new(ctx.user_id(), title);
    match services.projects.insert(project.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(project)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /video/projects?limit=
pub async fn list_projects(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Query(q): Query<dto::LimitQuery>,
) -> Response {
    match services.projects.list_for_user(ctx.user_id(), q.resolve()).await {
        Ok(projects) => Json(projects).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /video/projects/:id
pub async fn get_project(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
) -> Response {
    let Ok(project_id) = ProjectId::from_str(&id) else {
        return errors::invalid_id("project", &id);
    };
    match services.projects.get(project_id).await {
        Ok(Some(p)) if p.user_id == ctx.user_id() => Json(p).into_response(),
        Ok(_) => errors::json_error(StatusCode::NOT_FOUND, "project_not_found", "video project not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// POST /video/projects/:id/render
pub async fn render_project(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<UserContext>,
    Path(id): Path<String>,
) -> Response {
    let Ok(project_id) = ProjectId::from_str(&id) else {
        return errors::invalid_id("project", &id);
    };
    match services.render_queue.add_job(project_id, ctx.user_id()).await {
        Ok(queue_length) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "project_id": project_id.to_string(),
                "status": "queued",
                "queue_length": queue_length,
            })),
        )
            .into_response(),
        Err(e) => errors::render_error_to_response(e),
    }
}

/// GET /video/queue
pub async fn queue_status(Extension(services): Extension<Arc<AppServices>>) -> Response {
    Json(json!({ "queue_length": services.render_queue.queue_length() })).into_response()
}
