//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use productify_core::{JobId, UserId};

use super::types::AgentJob;
use crate::error::StoreError;

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Persist a new job.
    async fn insert(&self, job: AgentJob) -> Result<(), StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<AgentJob>, StoreError>;

    /// Overwrite a job only while the stored copy is still queued or running.
    ///
    /// Returns `false` when the stored job is already terminal; the write is
    /// then dropped. This is the only mutation path, so terminal jobs never
    /// change again.
    async fn update_active(&self, job: &AgentJob) -> Result<bool, StoreError>;

    /// A user's jobs, newest first.
    async fn list_for_user(&self, user_id: UserId, limit: usize)
    -> Result<Vec<AgentJob>, StoreError>;

    /// Number of the user's jobs that are queued or running.
    async fn count_active(&self, user_id: UserId) -> Result<usize, StoreError>;
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, AgentJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: AgentJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<AgentJob>, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs.get(&id).cloned())
    }

    async fn update_active(&self, job: &AgentJob) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        match jobs.get_mut(&job.id) {
            Some(stored) if stored.status.is_active() => {
                *stored = job.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<AgentJob>, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<AgentJob> = jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        // v7 ids break ties between jobs created in the same instant
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(limit);
        Ok(out)
    }

    async fn count_active(&self, user_id: UserId) -> Result<usize, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs
            .values()
            .filter(|j| j.user_id == user_id && j.status.is_active())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobError, JobStatus};
    use productify_ai::AgentKind;
    use serde_json::json;

    fn job(user_id: UserId) -> AgentJob {
        AgentJob::new(user_id, AgentKind::SeoOptimizer, json!({"text": "t"}), None)
    }

    #[tokio::test]
    async fn terminal_jobs_are_immutable() {
        let store = InMemoryJobStore::new();
        let mut j = job(UserId::new());
        store.insert(j.clone()).await.unwrap();

        j.mark_failed(JobError::execution("boom"));
        assert!(store.update_active(&j).await.unwrap());

        let mut late = j.clone();
        late.status = JobStatus::Succeeded;
        assert!(!store.update_active(&late).await.unwrap());

        let stored = store.get(j.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn updating_unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        assert_eq!(
            store.update_active(&job(UserId::new())).await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn lists_newest_first_and_counts_active() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();
        let other = UserId::new();

        let first = job(user);
        let mut second = job(user);
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        second.mark_cancelled();
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();
        store.insert(job(other)).await.unwrap();

        let listed = store.list_for_user(user, 10).await.unwrap();
        let ids: Vec<JobId> = listed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        assert_eq!(store.list_for_user(user, 1).await.unwrap().len(), 1);
        assert_eq!(store.count_active(user).await.unwrap(), 1);
        assert_eq!(store.count_active(other).await.unwrap(), 1);
    }
}
