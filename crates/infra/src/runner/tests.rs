use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use productify_ai::{AiError, ChatRequest, ImageRequest};
use productify_auth::PlanTier;

use super::*;
use crate::jobs::InMemoryJobStore;
use crate::users::{InMemoryUserStore, register_user};

#[derive(Clone)]
enum Reply {
    Text(&'static str),
    Fail(AiError),
    Hang,
    Panic,
}

struct ScriptedAi {
    reply: Reply,
    calls: AtomicUsize,
}

impl ScriptedAi {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    async fn answer(&self) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply.clone() {
            Reply::Text(t) => Ok(t.to_string()),
            Reply::Fail(err) => Err(err),
            Reply::Hang => std::future::pending().await,
            Reply::Panic => panic!("provider exploded"),
        }
    }
}

#[async_trait]
impl AiClient for ScriptedAi {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, _request: ChatRequest) -> Result<String, AiError> {
        self.answer().await
    }

    async fn generate_image(&self, _request: ImageRequest) -> Result<String, AiError> {
        self.answer().await
    }
}

struct Harness {
    runner: AgentRunner,
    users: Arc<InMemoryUserStore>,
    jobs: Arc<InMemoryJobStore>,
    ai: Arc<ScriptedAi>,
}

fn harness_with(reply: Reply, timeout: Duration) -> Harness {
    let users = Arc::new(InMemoryUserStore::new());
    let jobs = InMemoryJobStore::arc();
    let ai = ScriptedAi::new(reply);
    let runner = AgentRunner::new(
        users.clone(),
        jobs.clone(),
        ai.clone(),
        RunnerConfig::default().with_timeout(timeout),
    );
    Harness {
        runner,
        users,
        jobs,
        ai,
    }
}

fn harness(reply: Reply) -> Harness {
    harness_with(reply, Duration::from_secs(5))
}

async fn user_with(h: &Harness, plan: PlanTier, credits: i64) -> UserId {
    let user = register_user(h.users.as_ref(), "maker@example.com", plan)
        .await
        .unwrap();
    let surplus = user.credits - credits;
    if surplus > 0 {
        h.users
            .try_deduct(user.id, surplus, CreditReason::AgentExecution, None)
            .await
            .unwrap();
    }
    user.id
}

async fn wait_for(h: &Harness, job_id: JobId, want: impl Fn(&JobStatus) -> bool) -> AgentJob {
    for _ in 0..400 {
        let job = h.jobs.get(job_id).await.unwrap().unwrap();
        if want(&job.status) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never reached the expected status");
}

async fn balance(h: &Harness, user_id: UserId) -> i64 {
    h.users.get(user_id).await.unwrap().unwrap().credits
}

#[tokio::test]
async fn successful_job_deducts_its_estimate() {
    let h = harness(Reply::Text("polished copy"));
    let user = user_with(&h, PlanTier::Free, 10).await;

    let outcome = h
        .runner
        .run(user, "content_writer", json!({"text": "draft"}), None)
        .await
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Queued);
    assert_eq!(outcome.estimated_credits, 5);

    let job = wait_for(&h, outcome.job_id, JobStatus::is_terminal).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.consumed_credits, 5);
    assert_eq!(job.output, Some(json!({"content": "polished copy"})));
    assert_eq!(job.last_step(), Some("Completed"));
    assert_eq!(balance(&h, user).await, 5);

    let history = h.users.history(user, 10).await.unwrap();
    assert_eq!(history[0].delta, -5);
    assert_eq!(history[0].reason, CreditReason::AgentExecution);
    assert_eq!(history[0].job_id, Some(job.id));
}

#[tokio::test]
async fn low_balance_fails_without_running() {
    let h = harness(Reply::Text("unused"));
    let user = user_with(&h, PlanTier::Free, 3).await;
    let mut events = h.runner.subscribe();

    let outcome = h
        .runner
        .run(user, "content_writer", json!({"text": "draft"}), None)
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    let error = outcome.error.unwrap();
    assert_eq!(error.code, JobErrorCode::InsufficientCredits);

    let job = h.jobs.get(outcome.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.started_at.is_none());

    let event = events.recv().await.unwrap();
    assert_eq!(event.status, JobStatus::Failed);
    assert!(events.try_recv().is_err());

    assert_eq!(h.ai.calls.load(Ordering::SeqCst), 0);
    assert_eq!(balance(&h, user).await, 3);
}

#[tokio::test]
async fn provider_errors_map_to_job_codes() {
    let h = harness(Reply::Fail(AiError::QuotaExceeded("rate limited".into())));
    let user = user_with(&h, PlanTier::Free, 10).await;

    let outcome = h
        .runner
        .run(user, "seo_optimizer", json!({"text": "landing page"}), None)
        .await
        .unwrap();
    let job = wait_for(&h, outcome.job_id, JobStatus::is_terminal).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().code, JobErrorCode::QuotaExceeded);
    assert_eq!(job.consumed_credits, 0);
    assert_eq!(balance(&h, user).await, 10);
}

#[tokio::test]
async fn slow_provider_times_out() {
    let h = harness_with(Reply::Hang, Duration::from_millis(30));
    let user = user_with(&h, PlanTier::Free, 10).await;

    let outcome = h
        .runner
        .run(user, "outline_builder", json!({"topic": "Rust"}), None)
        .await
        .unwrap();
    let job = wait_for(&h, outcome.job_id, JobStatus::is_terminal).await;

    assert_eq!(job.error.unwrap().code, JobErrorCode::Timeout);
    assert_eq!(balance(&h, user).await, 10);
}

#[tokio::test]
async fn panicking_execution_is_marked_failed() {
    let h = harness(Reply::Panic);
    let user = user_with(&h, PlanTier::Free, 10).await;

    let outcome = h
        .runner
        .run(user, "content_writer", json!({"text": "draft"}), None)
        .await
        .unwrap();
    let job = wait_for(&h, outcome.job_id, JobStatus::is_terminal).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().code, JobErrorCode::ExecutionError);
    assert_eq!(balance(&h, user).await, 10);
}

#[tokio::test]
async fn cancelling_in_flight_job_stops_it_and_charges_nothing() {
    let h = harness(Reply::Hang);
    let user = user_with(&h, PlanTier::Free, 10).await;

    let outcome = h
        .runner
        .run(user, "content_writer", json!({"text": "draft"}), None)
        .await
        .unwrap();
    wait_for(&h, outcome.job_id, |s| *s == JobStatus::Running).await;

    let cancelled = h.runner.cancel_job(user, outcome.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let job = h.jobs.get(outcome.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error.unwrap().code, JobErrorCode::Cancelled);
    assert_eq!(balance(&h, user).await, 10);
}

#[tokio::test]
async fn cancelling_finished_job_is_rejected_and_changes_nothing() {
    let h = harness(Reply::Text("done"));
    let user = user_with(&h, PlanTier::Free, 10).await;

    let outcome = h
        .runner
        .run(user, "content_writer", json!({"text": "draft"}), None)
        .await
        .unwrap();
    let before = wait_for(&h, outcome.job_id, JobStatus::is_terminal).await;

    let err = h.runner.cancel_job(user, outcome.job_id).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::JobAlreadyFinished {
            status: JobStatus::Succeeded
        }
    ));

    let after = h.jobs.get(outcome.job_id).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn cancelling_failed_or_cancelled_job_changes_nothing() {
    let h = harness(Reply::Fail(AiError::InvalidApiKey("revoked".into())));
    let user = user_with(&h, PlanTier::Free, 10).await;
    let outcome = h
        .runner
        .run(user, "content_writer", json!({"text": "draft"}), None)
        .await
        .unwrap();
    let before = wait_for(&h, outcome.job_id, JobStatus::is_terminal).await;
    assert_eq!(before.status, JobStatus::Failed);

    let err = h.runner.cancel_job(user, outcome.job_id).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::JobAlreadyFinished {
            status: JobStatus::Failed
        }
    ));
    assert_eq!(h.jobs.get(outcome.job_id).await.unwrap().unwrap(), before);

    let h = harness(Reply::Hang);
    let user = user_with(&h, PlanTier::Free, 10).await;
    let outcome = h
        .runner
        .run(user, "content_writer", json!({"text": "draft"}), None)
        .await
        .unwrap();
    wait_for(&h, outcome.job_id, |s| *s == JobStatus::Running).await;
    let before = h.runner.cancel_job(user, outcome.job_id).await.unwrap();

    let err = h.runner.cancel_job(user, outcome.job_id).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::JobAlreadyFinished {
            status: JobStatus::Cancelled
        }
    ));
    assert_eq!(h.jobs.get(outcome.job_id).await.unwrap().unwrap(), before);
}

/// Cancels the stored job right before the success write lands, as a
/// `cancel_job` racing the end of execution would.
struct CancelBeforeSuccess(Arc<InMemoryJobStore>);

#[async_trait]
impl JobStore for CancelBeforeSuccess {
    async fn insert(&self, job: AgentJob) -> Result<(), StoreError> {
        self.0.insert(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<AgentJob>, StoreError> {
        self.0.get(id).await
    }

    async fn update_active(&self, job: &AgentJob) -> Result<bool, StoreError> {
        if job.status == JobStatus::Succeeded {
            let mut current = self.0.get(job.id).await?.ok_or(StoreError::NotFound)?;
            current.mark_cancelled();
            self.0.update_active(&current).await?;
        }
        self.0.update_active(job).await
    }

    async fn list_for_user(&self, user_id: UserId, limit: usize) -> Result<Vec<AgentJob>, StoreError> {
        self.0.list_for_user(user_id, limit).await
    }

    async fn count_active(&self, user_id: UserId) -> Result<usize, StoreError> {
        self.0.count_active(user_id).await
    }
}

#[tokio::test]
async fn cancel_after_deduction_is_refunded() {
    let users = Arc::new(InMemoryUserStore::new());
    let jobs = InMemoryJobStore::arc();
    let runner = AgentRunner::new(
        users.clone(),
        Arc::new(CancelBeforeSuccess(jobs.clone())),
        ScriptedAi::new(Reply::Text("late answer")),
        RunnerConfig::default(),
    );
    let user = register_user(users.as_ref(), "race@example.com", PlanTier::Free)
        .await
        .unwrap();

    let outcome = runner
        .run(user.id, "content_writer", json!({"text": "draft"}), None)
        .await
        .unwrap();

    let mut history = Vec::new();
    for _ in 0..400 {
        history = users.history(user.id, 10).await.unwrap();
        if history.first().map(|t| t.reason) == Some(CreditReason::Refund) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(history[0].reason, CreditReason::Refund);
    assert_eq!(history[0].delta, 5);
    assert_eq!(history[0].job_id, Some(outcome.job_id));
    assert_eq!(history[1].reason, CreditReason::AgentExecution);
    assert_eq!(history[1].delta, -5);
    assert_eq!(users.get(user.id).await.unwrap().unwrap().credits, 10);

    let job = jobs.get(outcome.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.consumed_credits, 0);
}

#[tokio::test]
async fn concurrent_runs_never_overdraw() {
    let h = harness(Reply::Text("ok"));
    let user = user_with(&h, PlanTier::Plus, 5).await;

    let first = h
        .runner
        .run(user, "content_writer", json!({"text": "a"}), None)
        .await
        .unwrap();
    let second = h
        .runner
        .run(user, "content_writer", json!({"text": "b"}), None)
        .await
        .unwrap();
    assert_eq!(first.status, JobStatus::Queued);
    assert_eq!(second.status, JobStatus::Queued);

    let a = wait_for(&h, first.job_id, JobStatus::is_terminal).await;
    let b = wait_for(&h, second.job_id, JobStatus::is_terminal).await;

    let mut statuses = vec![a.status, b.status];
    statuses.sort_by_key(|s| s.as_str());
    assert_eq!(statuses, vec![JobStatus::Failed, JobStatus::Succeeded]);

    let failed = if a.status == JobStatus::Failed { a } else { b };
    assert_eq!(failed.error.unwrap().code, JobErrorCode::InsufficientCredits);
    assert_eq!(balance(&h, user).await, 0);
}

#[tokio::test]
async fn rejected_requests_persist_nothing() {
    let h = harness(Reply::Text("unused"));
    let user = user_with(&h, PlanTier::Free, 10).await;

    assert!(matches!(
        h.runner.run(user, "video_agent", json!({}), None).await,
        Err(RunnerError::UnknownAgent(_))
    ));
    assert!(matches!(
        h.runner
            .run(user, "image_agent", json!({"text": "no prompt"}), None)
            .await,
        Err(RunnerError::InvalidInput(_))
    ));
    assert!(matches!(
        h.runner
            .run(user, "image_agent", json!({"prompt": "cover", "size": "9x9&x=1"}), None)
            .await,
        Err(RunnerError::InvalidInput(_))
    ));
    assert!(matches!(
        h.runner
            .run(UserId::new(), "content_writer", json!({"text": "x"}), None)
            .await,
        Err(RunnerError::UserNotFound)
    ));

    assert!(h.runner.list_jobs(user, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn jobs_are_private_to_their_owner() {
    let h = harness(Reply::Text("ok"));
    let owner = user_with(&h, PlanTier::Free, 10).await;
    let stranger = register_user(h.users.as_ref(), "other@example.com", PlanTier::Free)
        .await
        .unwrap()
        .id;

    let outcome = h
        .runner
        .run(owner, "seo_optimizer", json!({"text": "t"}), None)
        .await
        .unwrap();

    assert!(matches!(
        h.runner.get_job_status(stranger, outcome.job_id).await,
        Err(RunnerError::JobNotFound)
    ));
    assert!(matches!(
        h.runner.cancel_job(stranger, outcome.job_id).await,
        Err(RunnerError::JobNotFound)
    ));
    assert!(h.runner.list_jobs(stranger, 10).await.unwrap().is_empty());
    assert_eq!(h.runner.list_jobs(owner, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn events_follow_the_lifecycle() {
    let h = harness(Reply::Text("ok"));
    let user = user_with(&h, PlanTier::Free, 10).await;
    let mut events = h.runner.subscribe();

    let outcome = h
        .runner
        .run(user, "content_writer", json!({"text": "draft"}), None)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while seen.last() != Some(&JobStatus::Succeeded) {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.job_id, outcome.job_id);
        assert_eq!(event.user_id, user);
        seen.push(event.status);
    }
    assert_eq!(
        seen,
        vec![JobStatus::Queued, JobStatus::Running, JobStatus::Succeeded]
    );
}
