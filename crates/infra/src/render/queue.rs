//! Single-worker FIFO render queue.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use productify_core::{ProjectId, UserId};

use super::project::{VideoProjectStore, VideoStatus};
use crate::error::StoreError;

/// A pending render. Lives only in process memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderJob {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("video project not found")]
    ProjectNotFound,

    #[error("video project is already {0}")]
    AlreadyQueued(VideoStatus),

    #[error("render failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Produces the output for one render job.
#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    /// Returns the URL of the rendered video.
    async fn render(&self, job: &RenderJob) -> Result<String, RenderError>;
}

/// Sleeps a random duration in `[min, max]` and returns a placeholder URL.
#[derive(Debug, Clone)]
pub struct SimulatedRenderer {
    min: Duration,
    max: Duration,
}

impl SimulatedRenderer {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    fn pick_duration(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[async_trait]
impl Renderer for SimulatedRenderer {
    async fn render(&self, job: &RenderJob) -> Result<String, RenderError> {
        let duration = self.pick_duration();
        debug!(project_id = %job.project_id, millis = duration.as_millis() as u64, "simulating render");
        tokio::time::sleep(duration).await;
        Ok(format!(
            "https://cdn.productify.ai/renders/{}.mp4",
            job.project_id
        ))
    }
}

/// Handle to the render queue; cheap to clone.
#[derive(Clone)]
pub struct RenderQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    wake: Notify,
    projects: Arc<dyn VideoProjectStore>,
    renderer: Arc<dyn Renderer>,
}

/// `claimed` holds every project that is reserved, pending or rendering in
/// this process. The persisted status alone does not count, so a project left
/// `queued` by a restart can be queued again.
#[derive(Default)]
struct QueueState {
    pending: VecDeque<RenderJob>,
    claimed: HashSet<ProjectId>,
}

/// Handle to control the running worker.
#[derive(Debug)]
pub struct RenderWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RenderWorkerHandle {
    /// Stop the worker after the render in progress; pending jobs are dropped.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "render worker ended abnormally");
        }
    }
}

impl RenderQueue {
    pub fn new(projects: Arc<dyn VideoProjectStore>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                wake: Notify::new(),
                projects,
                renderer,
            }),
        }
    }

    /// Enqueue a render of the user's project and wake the worker.
    ///
    /// Returns the queue length after the push.
    pub async fn add_job(&self, project_id: ProjectId, user_id: UserId) -> Result<usize, RenderError> {
        let project = self
            .inner
            .projects
            .get(project_id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or(RenderError::ProjectNotFound)?;
        if !self.inner.lock_state().claimed.insert(project_id) {
            let status = if project.status.is_in_progress() {
                project.status
            } else {
                VideoStatus::Queued
            };
            return Err(RenderError::AlreadyQueued(status));
        }

        if let Err(err) = self
            .inner
            .projects
            .update_status(project_id, VideoStatus::Queued, None, None)
            .await
        {
            self.inner.release(project_id);
            return Err(err.into());
        }

        let len = {
            let mut state = self.inner.lock_state();
            state.pending.push_back(RenderJob {
                project_id,
                user_id,
                enqueued_at: Utc::now(),
            });
            state.pending.len()
        };
        self.inner.wake.notify_one();
        info!(project_id = %project_id, user_id = %user_id, queue_length = len, "render job queued");
        Ok(len)
    }

    /// Jobs waiting to be picked up; the one rendering now is not counted.
    pub fn queue_length(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    /// Start the single drain loop.
    pub fn spawn_worker(&self) -> RenderWorkerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let inner = Arc::clone(&self.inner);

        let join = tokio::spawn(async move {
            info!("render worker started");
            loop {
                if *stop.borrow() {
                    break;
                }
                let next = inner.lock_state().pending.pop_front();
                match next {
                    Some(job) => {
                        let project_id = job.project_id;
                        inner.process(job).await;
                        inner.release(project_id);
                    }
                    None => {
                        tokio::select! {
                            _ = inner.wake.notified() => {}
                            changed = stop.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            let dropped = {
                let mut state = inner.lock_state();
                let QueueState { pending, claimed } = &mut *state;
                let n = pending.len();
                for job in pending.drain(..) {
                    claimed.remove(&job.project_id);
                }
                n
            };
            info!(dropped, "render worker stopped");
        });

        RenderWorkerHandle { shutdown, join }
    }
}

impl QueueInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, project_id: ProjectId) {
        self.lock_state().claimed.remove(&project_id);
    }

    async fn process(&self, job: RenderJob) {
        let project_id = job.project_id;
        if let Err(err) = self
            .projects
            .update_status(project_id, VideoStatus::Rendering, None, None)
            .await
        {
            warn!(project_id = %project_id, error = %err, "skipping render: could not mark project rendering");
            return;
        }

        let update = match self.renderer.render(&job).await {
            Ok(url) => {
                info!(project_id = %project_id, output_url = %url, "render completed");
                self.projects
                    .update_status(project_id, VideoStatus::Completed, Some(url), None)
                    .await
            }
            Err(err) => {
                warn!(project_id = %project_id, error = %err, "render failed");
                self.projects
                    .update_status(project_id, VideoStatus::Failed, None, Some(err.to_string()))
                    .await
            }
        };
        if let Err(err) = update {
            warn!(project_id = %project_id, error = %err, "could not record render result");
        }
    }
}
