//! Agent job runner.
//!
//! `run` checks the balance, persists the job and spawns execution without
//! awaiting it. Credits are deducted only after the provider call succeeds,
//! with an atomic check-and-deduct. Every state change is broadcast as a
//! [`JobEvent`].

pub mod agents;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tracing::{Instrument, debug, error, info, info_span, warn};

use productify_ai::{AgentKind, AiClient, UnknownAgent};
use productify_core::{JobId, ProjectId, UserId};

use crate::error::StoreError;
use crate::jobs::{AgentJob, JobError, JobErrorCode, JobStatus, JobStore};
use crate::users::{CreditError, CreditReason, UserStore};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Upper bound on one provider call
    pub timeout: Duration,
    /// Broadcast buffer; slower subscribers see a lag error
    pub event_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            event_capacity: 256,
        }
    }
}

impl RunnerConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A job state change, as pushed to SSE subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub user_id: UserId,
    pub agent: AgentKind,
    pub status: JobStatus,
    pub step: Option<String>,
    pub error: Option<JobError>,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    fn from_job(job: &AgentJob) -> Self {
        Self {
            job_id: job.id,
            user_id: job.user_id,
            agent: job.agent,
            status: job.status,
            step: job.last_step().map(str::to_string),
            error: job.error.clone(),
            at: job.updated_at,
        }
    }
}

/// What `run` reports back immediately.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub estimated_credits: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    UnknownAgent(#[from] UnknownAgent),

    #[error("{0}")]
    InvalidInput(String),

    #[error("user not found")]
    UserNotFound,

    #[error("job not found")]
    JobNotFound,

    #[error("job already {status}")]
    JobAlreadyFinished { status: JobStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle to the runner; cheap to clone.
#[derive(Clone)]
pub struct AgentRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    users: Arc<dyn UserStore>,
    jobs: Arc<dyn JobStore>,
    ai: Arc<dyn AiClient>,
    timeout: Duration,
    cancels: Mutex<HashMap<JobId, Arc<Notify>>>,
    events: broadcast::Sender<JobEvent>,
}

impl AgentRunner {
    pub fn new(
        users: Arc<dyn UserStore>,
        jobs: Arc<dyn JobStore>,
        ai: Arc<dyn AiClient>,
        config: RunnerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(RunnerInner {
                users,
                jobs,
                ai,
                timeout: config.timeout,
                cancels: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Name of the configured AI provider.
    pub fn provider(&self) -> &'static str {
        self.inner.ai.name()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub async fn run(
        &self,
        user_id: UserId,
        agent_name: &str,
        input: JsonValue,
        project_id: Option<ProjectId>,
    ) -> Result<RunOutcome, RunnerError> {
        let agent: AgentKind = agent_name.parse()?;
        agent
            .validate_input(&input)
            .map_err(|e| RunnerError::InvalidInput(e.to_string()))?;

        let user = self
            .inner
            .users
            .get(user_id)
            .await?
            .ok_or(RunnerError::UserNotFound)?;

        let mut job = AgentJob::new(user_id, agent, input, project_id);

        if user.credits < job.estimated_credits {
            let error = JobError::insufficient_credits(user.credits, job.estimated_credits);
            job.mark_failed(error.clone());
            self.inner.jobs.insert(job.clone()).await?;
            self.inner.publish(&job);
            info!(
                job_id = %job.id,
                user_id = %user_id,
                agent = %agent,
                balance = user.credits,
                required = job.estimated_credits,
                "agent job refused: insufficient credits"
            );
            return Ok(RunOutcome {
                job_id: job.id,
                status: job.status,
                estimated_credits: job.estimated_credits,
                error: Some(error),
            });
        }

        self.inner.jobs.insert(job.clone()).await?;
        self.inner.publish(&job);

        let outcome = RunOutcome {
            job_id: job.id,
            status: job.status,
            estimated_credits: job.estimated_credits,
            error: None,
        };

        let cancel = Arc::new(Notify::new());
        self.inner
            .cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id, Arc::clone(&cancel));

        let span = info_span!("agent_job", job_id = %job.id, user_id = %user_id, agent = %agent);
        let job_id = job.id;
        let inner = Arc::clone(&self.inner);
        let execution = tokio::spawn(async move { inner.execute(job, cancel).await }.instrument(span.clone()));

        let inner = Arc::clone(&self.inner);
        tokio::spawn(
            async move {
                match execution.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => inner.fail_unhandled(job_id, err.to_string()).await,
                    Err(join) => {
                        inner
                            .fail_unhandled(job_id, format!("agent execution aborted: {join}"))
                            .await
                    }
                }
                inner.forget(job_id);
            }
            .instrument(span),
        );

        info!(job_id = %job_id, user_id = %user_id, agent = %agent, "agent job queued");
        Ok(outcome)
    }

    /// A job owned by `user_id`. Other users' jobs are reported as not found.
    pub async fn get_job_status(
        &self,
        user_id: UserId,
        job_id: JobId,
    ) -> Result<AgentJob, RunnerError> {
        match self.inner.jobs.get(job_id).await? {
            Some(job) if job.user_id == user_id => Ok(job),
            _ => Err(RunnerError::JobNotFound),
        }
    }

    pub async fn cancel_job(&self, user_id: UserId, job_id: JobId) -> Result<AgentJob, RunnerError> {
        let mut job = self.get_job_status(user_id, job_id).await?;
        if job.status.is_terminal() {
            return Err(RunnerError::JobAlreadyFinished { status: job.status });
        }

        job.mark_cancelled();
        if !self.inner.jobs.update_active(&job).await? {
            // finished between the read and the write
            let status = self
                .inner
                .jobs
                .get(job_id)
                .await?
                .map(|j| j.status)
                .ok_or(RunnerError::JobNotFound)?;
            return Err(RunnerError::JobAlreadyFinished { status });
        }

        if let Some(signal) = self
            .inner
            .cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
        {
            signal.notify_one();
        }
        self.inner.publish(&job);
        info!(job_id = %job_id, user_id = %user_id, "agent job cancelled");
        Ok(job)
    }

    /// Newest first.
    pub async fn list_jobs(&self, user_id: UserId, limit: usize) -> Result<Vec<AgentJob>, RunnerError> {
        Ok(self.inner.jobs.list_for_user(user_id, limit).await?)
    }

    /// Queued plus running jobs, as counted by the active-job guard.
    pub async fn active_jobs(&self, user_id: UserId) -> Result<usize, RunnerError> {
        Ok(self.inner.jobs.count_active(user_id).await?)
    }
}

impl RunnerInner {
    fn publish(&self, job: &AgentJob) {
        // no subscribers is fine
        let _ = self.events.send(JobEvent::from_job(job));
    }

    fn forget(&self, job_id: JobId) {
        self.cancels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
    }

    async fn execute(&self, mut job: AgentJob, cancel: Arc<Notify>) -> Result<(), StoreError> {
        job.mark_running();
        job.push_step(agents::progress_step(job.agent));
        if !self.jobs.update_active(&job).await? {
            debug!("job left the active set before starting");
            return Ok(());
        }
        self.publish(&job);

        let input = job.input.clone();
        let call = agents::dispatch(self.ai.as_ref(), job.agent, &input);
        let result = tokio::select! {
            _ = cancel.notified() => {
                debug!("provider call abandoned after cancel");
                return Ok(());
            }
            res = tokio::time::timeout(self.timeout, call) => res,
        };

        match result {
            Err(_) => {
                let error = JobError::new(
                    JobErrorCode::Timeout,
                    format!("agent call exceeded {}s", self.timeout.as_secs_f64()),
                );
                self.finish_failed(job, error).await
            }
            Ok(Err(err)) => self.finish_failed(job, JobError::from(&err)).await,
            Ok(Ok(output)) => self.finish_succeeded(job, output).await,
        }
    }

    async fn finish_failed(&self, mut job: AgentJob, error: JobError) -> Result<(), StoreError> {
        warn!(code = ?error.code, error = %error.message, "agent job failed");
        job.mark_failed(error);
        if self.jobs.update_active(&job).await? {
            self.publish(&job);
        }
        Ok(())
    }

    async fn finish_succeeded(&self, mut job: AgentJob, output: JsonValue) -> Result<(), StoreError> {
        match self.jobs.get(job.id).await? {
            Some(current) if current.status.is_active() => {}
            _ => {
                debug!("job left the active set during the provider call");
                return Ok(());
            }
        }

        let cost = job.estimated_credits;
        let balance = match self
            .users
            .try_deduct(job.user_id, cost, CreditReason::AgentExecution, Some(job.id))
            .await
        {
            Ok(balance) => balance,
            Err(CreditError::Insufficient { balance, required }) => {
                return self
                    .finish_failed(job, JobError::insufficient_credits(balance, required))
                    .await;
            }
            Err(CreditError::Store(err)) => return Err(err),
            Err(other) => return self.finish_failed(job, JobError::execution(other.to_string())).await,
        };

        job.push_step("Completed");
        job.mark_succeeded(output, cost);
        if self.jobs.update_active(&job).await? {
            self.publish(&job);
            info!(consumed_credits = cost, balance, "agent job succeeded");
            return Ok(());
        }

        // cancelled between the deduction and the status write
        match self
            .users
            .add_credits(job.user_id, cost, CreditReason::Refund, Some(job.id))
            .await
        {
            Ok(balance) => info!(refunded = cost, balance, "credits refunded for cancelled job"),
            Err(err) => error!(error = %err, refund = cost, "credit refund failed"),
        }
        Ok(())
    }

    /// Last resort when execution errored or panicked outside the normal paths.
    async fn fail_unhandled(&self, job_id: JobId, message: String) {
        error!(job_id = %job_id, error = %message, "agent execution failed unexpectedly");
        let mut job = match self.jobs.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(err) => {
                error!(job_id = %job_id, error = %err, "could not load job to mark it failed");
                return;
            }
        };
        if job.status.is_terminal() {
            return;
        }
        job.mark_failed(JobError::execution(message));
        match self.jobs.update_active(&job).await {
            Ok(true) => self.publish(&job),
            Ok(false) => {}
            Err(err) => error!(job_id = %job_id, error = %err, "could not mark job failed"),
        }
    }
}

#[cfg(test)]
mod tests;
