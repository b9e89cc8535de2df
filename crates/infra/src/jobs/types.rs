//! Core job types.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use productify_ai::{AgentKind, AiError};
use productify_core::{JobId, ProjectId, UserId};

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Persisted, execution not started yet
    Queued,
    /// Provider call in flight
    Running,
    Succeeded,
    Failed,
    /// Cancelled by the owner
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobErrorCode {
    InsufficientCredits,
    ExecutionError,
    Timeout,
    QuotaExceeded,
    InvalidApiKey,
    Cancelled,
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: JobErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: JobErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn insufficient_credits(balance: i64, required: i64) -> Self {
        Self::new(
            JobErrorCode::InsufficientCredits,
            format!("requires {required} credits, balance is {balance}"),
        )
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(JobErrorCode::ExecutionError, message)
    }
}

impl From<&AiError> for JobError {
    fn from(err: &AiError) -> Self {
        let code = match err {
            AiError::QuotaExceeded(_) => JobErrorCode::QuotaExceeded,
            AiError::InvalidApiKey(_) => JobErrorCode::InvalidApiKey,
            _ => JobErrorCode::ExecutionError,
        };
        Self::new(code, err.to_string())
    }
}

/// Human-readable progress entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStep {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// One agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentJob {
    pub id: JobId,
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    pub agent: AgentKind,
    pub input: JsonValue,
    pub status: JobStatus,
    pub estimated_credits: i64,
    pub consumed_credits: i64,
    pub output: Option<JsonValue>,
    pub error: Option<JobError>,
    pub steps: Vec<JobStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AgentJob {
    /// A queued job, costed from the agent's fixed estimate.
    pub fn new(
        user_id: UserId,
        agent: AgentKind,
        input: JsonValue,
        project_id: Option<ProjectId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id,
            project_id,
            agent,
            input,
            status: JobStatus::Queued,
            estimated_credits: agent.estimated_credits(),
            consumed_credits: 0,
            output: None,
            error: None,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn push_step(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.steps.push(JobStep {
            at: now,
            message: message.into(),
        });
        self.updated_at = now;
    }

    pub fn last_step(&self) -> Option<&str> {
        self.steps.last().map(|s| s.message.as_str())
    }

    pub fn mark_running(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_succeeded(&mut self, output: JsonValue, consumed_credits: i64) {
        let now = Utc::now();
        self.status = JobStatus::Succeeded;
        self.output = Some(output);
        self.consumed_credits = consumed_credits;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: JobError) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Cancelled;
        self.error = Some(JobError::new(JobErrorCode::Cancelled, "cancelled by user"));
        self.finished_at = Some(now);
        self.updated_at = now;
    }
}
