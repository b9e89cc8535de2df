//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, AI provider, runner and render queue
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use anyhow::Context;
use axum::Router;

use productify_infra::AppConfig;
use productify_infra::render::RenderWorkerHandle;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// A ready-to-serve application plus its background worker.
pub struct App {
    pub router: Router,
    pub services: Arc<AppServices>,
    pub render_worker: RenderWorkerHandle,
}

/// Build services from config and start the render worker.
pub async fn build_app(config: AppConfig) -> anyhow::Result<App> {
    let services = AppServices::from_config(config)
        .await
        .context("failed to initialize storage")?;
    Ok(start(services))
}

/// Wire the router around already-built services. Must run inside a Tokio runtime.
pub fn start(services: AppServices) -> App {
    let services = Arc::new(services);
    let render_worker = services.render_queue.spawn_worker();
    App {
        router: routes::router(services.clone()),
        services,
        render_worker,
    }
}
