use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use productify_core::{ProjectId, UserId};

use crate::error::StoreError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Draft,
    Queued,
    Rendering,
    Completed,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Draft => "draft",
            VideoStatus::Queued => "queued",
            VideoStatus::Rendering => "rendering",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(VideoStatus::Draft),
            "queued" => Some(VideoStatus::Queued),
            "rendering" => Some(VideoStatus::Rendering),
            "completed" => Some(VideoStatus::Completed),
            "failed" => Some(VideoStatus::Failed),
            _ => None,
        }
    }

    /// Waiting in the queue or being rendered right now.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, VideoStatus::Queued | VideoStatus::Rendering)
    }
}

impl core::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoProject {
    pub id: ProjectId,
    pub user_id: UserId,
    pub title: String,
    pub status: VideoStatus,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoProject {
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            user_id,
            title: title.into(),
            status: VideoStatus::Draft,
            output_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait VideoProjectStore: Send + Sync + 'static {
    async fn insert(&self, project: VideoProject) -> Result<(), StoreError>;

    async fn get(&self, id: ProjectId) -> Result<Option<VideoProject>, StoreError>;

    /// Set the status together with its result fields; `None` clears them.
    async fn update_status(
        &self,
        id: ProjectId,
        status: VideoStatus,
        output_url: Option<String>,
        error: Option<String>,
    ) -> Result<VideoProject, StoreError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<VideoProject>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryVideoProjectStore {
    projects: RwLock<HashMap<ProjectId, VideoProject>>,
}

impl InMemoryVideoProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl VideoProjectStore for InMemoryVideoProjectStore {
    async fn insert(&self, project: VideoProject) -> Result<(), StoreError> {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        if projects.contains_key(&project.id) {
            return Err(StoreError::AlreadyExists(project.id.to_string()));
        }
        projects.insert(project.id, project);
        Ok(())
    }

    async fn get(&self, id: ProjectId) -> Result<Option<VideoProject>, StoreError> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(projects.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: ProjectId,
        status: VideoStatus,
        output_url: Option<String>,
        error: Option<String>,
    ) -> Result<VideoProject, StoreError> {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        let project = projects.get_mut(&id).ok_or(StoreError::NotFound)?;
        project.status = status;
        project.output_url = output_url;
        project.error = error;
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<VideoProject>, StoreError> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<VideoProject> = projects
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_updates_replace_result_fields() {
        let store = InMemoryVideoProjectStore::new();
        let project = VideoProject::new(UserId::new(), "Launch teaser");
        store.insert(project.clone()).await.unwrap();

        let failed = store
            .update_status(project.id, VideoStatus::Failed, None, Some("codec".into()))
            .await
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("codec"));

        let queued = store
            .update_status(project.id, VideoStatus::Queued, None, None)
            .await
            .unwrap();
        assert_eq!(queued.status, VideoStatus::Queued);
        assert!(queued.error.is_none());
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let store = InMemoryVideoProjectStore::new();
        assert_eq!(
            store
                .update_status(ProjectId::new(), VideoStatus::Queued, None, None)
                .await,
            Err(StoreError::NotFound)
        );
    }
}
