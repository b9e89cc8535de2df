//! Service wiring: stores, AI provider, runner and render queue.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio_stream::{
    StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};

use productify_ai::{AiClient, MockAiClient, OpenAiClient, OpenAiConfig};
use productify_core::UserId;
use productify_infra::{
    AppConfig, StoreError,
    jobs::{InMemoryJobStore, JobStore},
    postgres::PostgresStore,
    render::{InMemoryVideoProjectStore, RenderQueue, SimulatedRenderer, VideoProjectStore},
    runner::{AgentRunner, RunnerConfig},
    users::{InMemoryUserStore, UserStore},
};

/// Everything the handlers need, shared as `Arc<AppServices>`.
pub struct AppServices {
    pub config: AppConfig,
    pub users: Arc<dyn UserStore>,
    pub projects: Arc<dyn VideoProjectStore>,
    pub runner: AgentRunner,
    pub render_queue: RenderQueue,
}

impl AppServices {
    /// Pick stores (in-memory or Postgres) and the AI provider from config.
    pub async fn from_config(config: AppConfig) -> Result<Self, StoreError> {
        let ai = ai_client(&config);

        match (config.mock_db, config.database_url.clone()) {
            (false, Some(url)) => {
                let store = Arc::new(PostgresStore::connect(&url).await?);
                store.init_schema().await?;
                tracing::info!(provider = ai.name(), "using postgres stores");
                Ok(Self::assemble(
                    config,
                    store.clone(),
                    store.clone(),
                    store,
                    ai,
                ))
            }
            _ => {
                tracing::info!(provider = ai.name(), "using in-memory stores");
                Ok(Self::in_memory(config, ai))
            }
        }
    }

    /// In-memory stores with an explicit AI client (dev and tests).
    pub fn in_memory(config: AppConfig, ai: Arc<dyn AiClient>) -> Self {
        Self::assemble(
            config,
            Arc::new(InMemoryUserStore::new()),
            InMemoryJobStore::arc(),
            InMemoryVideoProjectStore::arc(),
            ai,
        )
    }

    fn assemble(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        jobs: Arc<dyn JobStore>,
        projects: Arc<dyn VideoProjectStore>,
        ai: Arc<dyn AiClient>,
    ) -> Self {
        let runner = AgentRunner::new(
            users.clone(),
            jobs,
            ai,
            RunnerConfig::default().with_timeout(config.ai_timeout),
        );
        let renderer = Arc::new(SimulatedRenderer::new(config.render_min, config.render_max));
        let render_queue = RenderQueue::new(projects.clone(), renderer);

        Self {
            config,
            users,
            projects,
            runner,
            render_queue,
        }
    }
}

fn ai_client(config: &AppConfig) -> Arc<dyn AiClient> {
    match &config.openai {
        Some(settings) => Arc::new(OpenAiClient::new(OpenAiConfig {
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            chat_model: settings.chat_model.clone(),
            image_model: settings.image_model.clone(),
        })),
        None => {
            tracing::warn!("OPENAI_API_KEY not set; agents return placeholder output");
            Arc::new(MockAiClient::new())
        }
    }
}

/// SSE stream of one user's job events. The event name is the job status.
pub fn user_job_stream(
    services: Arc<AppServices>,
    user_id: UserId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.runner.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(event) if event.user_id == user_id => {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(event.status.as_str()).data(data)))
        }
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(user_id = %user_id, skipped, "job stream subscriber lagged");
            let data = serde_json::json!({ "error": "lagged", "skipped": skipped }).to_string();
            Some(Ok(SseEvent::default().event("error").data(data)))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
