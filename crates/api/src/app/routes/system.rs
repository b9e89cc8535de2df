use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};
use chrono::Utc;

use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "ai_provider": services.runner.provider(),
        "render_queue_length": services.render_queue.queue_length(),
        "time": Utc::now().to_rfc3339(),
    }))
}
