use std::sync::Arc;

use axum::{
    Extension, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use tower::ServiceBuilder;

use productify_auth::{Feature, PlanTier};

use crate::app::services::AppServices;
use crate::middleware::{self, FeatureRequirement, PlanRequirement};

pub mod agents;
pub mod credits;
pub mod system;
pub mod users;
pub mod video;

/// Full routing tree.
///
/// `/health` and `POST /users` are public; everything else runs behind
/// `user_context_middleware`.
pub fn router(services: Arc<AppServices>) -> Router {
    let run = Router::new()
        .route("/agents/run", post(agents::run_agent))
        .route_layer(from_fn_with_state(
            services.clone(),
            middleware::active_job_guard,
        ));

    // monthly refills are a paid-plan benefit
    let refill = Router::new()
        .route("/credits/refill", post(credits::refill))
        .route_layer(from_fn_with_state(
            PlanRequirement::new(PlanTier::Plus, &services.config.upgrade_url),
            middleware::require_plan,
        ));

    let video = video::router().route_layer(from_fn_with_state(
        FeatureRequirement::new(Feature::VideoRender, &services.config.upgrade_url),
        middleware::require_feature,
    ));

    let authenticated = Router::new()
        .route("/me", get(users::me))
        .route("/me/plan", post(users::change_plan))
        .route("/plan/check", get(users::plan_check))
        .route("/credits", get(credits::balance))
        .route("/credits/history", get(credits::history))
        .route("/agents", get(agents::catalog))
        .route("/agents/jobs", get(agents::list_jobs))
        .route("/agents/jobs/:id", get(agents::get_job))
        .route("/agents/jobs/:id/cancel", post(agents::cancel_job))
        .route("/agents/stream", get(agents::stream))
        .merge(run)
        .merge(refill)
        .nest("/video", video)
        .route_layer(from_fn_with_state(
            services.clone(),
            middleware::user_context_middleware,
        ));

    Router::new()
        .route("/health", get(system::health))
        .route("/users", post(users::create_user))
        .merge(authenticated)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
