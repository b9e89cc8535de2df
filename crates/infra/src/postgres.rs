//! Postgres-backed stores.
//!
//! `PostgresStore` implements [`UserStore`], [`JobStore`] and
//! [`VideoProjectStore`] over one `PgPool`. Tables are created idempotently
//! by [`PostgresStore::init_schema`].
//!
//! ## Invariants
//!
//! - Credit deduction is one conditional `UPDATE ... WHERE credits >= $2`, in
//!   the same transaction as its history row, so a balance never goes negative.
//! - Job writes only touch rows whose status is `queued` or `running`.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use productify_ai::AgentKind;
use productify_auth::PlanTier;
use productify_core::{JobId, ProjectId, UserId};

use crate::error::StoreError;
use crate::jobs::{AgentJob, JobError, JobStatus, JobStep, JobStore};
use crate::render::{VideoProject, VideoProjectStore, VideoStatus};
use crate::users::{CreditError, CreditReason, CreditTransaction, User, UserStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id          UUID PRIMARY KEY,
        email       TEXT NOT NULL UNIQUE,
        plan        TEXT NOT NULL,
        credits     BIGINT NOT NULL CHECK (credits >= 0),
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS credit_transactions (
        id             UUID PRIMARY KEY,
        user_id        UUID NOT NULL REFERENCES users(id),
        delta          BIGINT NOT NULL,
        balance_after  BIGINT NOT NULL,
        reason         TEXT NOT NULL,
        job_id         UUID,
        created_at     TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS credit_transactions_user_idx ON credit_transactions (user_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS agent_jobs (
        id                 UUID PRIMARY KEY,
        user_id            UUID NOT NULL REFERENCES users(id),
        project_id         UUID,
        agent              TEXT NOT NULL,
        input              JSONB NOT NULL,
        status             TEXT NOT NULL,
        estimated_credits  BIGINT NOT NULL,
        consumed_credits   BIGINT NOT NULL DEFAULT 0,
        output             JSONB,
        error              JSONB,
        steps              JSONB NOT NULL DEFAULT '[]'::jsonb,
        created_at         TIMESTAMPTZ NOT NULL,
        updated_at         TIMESTAMPTZ NOT NULL,
        started_at         TIMESTAMPTZ,
        finished_at        TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS agent_jobs_user_idx ON agent_jobs (user_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS video_projects (
        id          UUID PRIMARY KEY,
        user_id     UUID NOT NULL REFERENCES users(id),
        title       TEXT NOT NULL,
        status      TEXT NOT NULL,
        output_url  TEXT,
        error       TEXT,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("init_schema", e))?;
        }
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // unique violation
                Some("23505") => StoreError::AlreadyExists(msg),
                _ => StoreError::Storage(msg),
            }
        }
        other => StoreError::Storage(format!("{operation}: {other}")),
    }
}

fn decode_error(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(format!("invalid {what} row: {err}"))
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let plan: String = row.try_get("plan").map_err(|e| decode_error("user", e))?;
    Ok(User {
        id: UserId::from_uuid(row.try_get("id").map_err(|e| decode_error("user", e))?),
        email: row.try_get("email").map_err(|e| decode_error("user", e))?,
        plan: PlanTier::from_str(&plan).map_err(|e| decode_error("user", e))?,
        credits: row.try_get("credits").map_err(|e| decode_error("user", e))?,
        created_at: row.try_get("created_at").map_err(|e| decode_error("user", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| decode_error("user", e))?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<CreditTransaction, StoreError> {
    let reason: String = row.try_get("reason").map_err(|e| decode_error("credit", e))?;
    let job_id: Option<Uuid> = row.try_get("job_id").map_err(|e| decode_error("credit", e))?;
    Ok(CreditTransaction {
        id: row.try_get("id").map_err(|e| decode_error("credit", e))?,
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(|e| decode_error("credit", e))?),
        delta: row.try_get("delta").map_err(|e| decode_error("credit", e))?,
        balance_after: row.try_get("balance_after").map_err(|e| decode_error("credit", e))?,
        reason: CreditReason::parse(&reason)
            .ok_or_else(|| decode_error("credit", format!("unknown reason '{reason}'")))?,
        job_id: job_id.map(JobId::from_uuid),
        created_at: row.try_get("created_at").map_err(|e| decode_error("credit", e))?,
    })
}

fn job_from_row(row: &PgRow) -> Result<AgentJob, StoreError> {
    let get_err = |e: sqlx::Error| decode_error("job", e);
    let agent: String = row.try_get("agent").map_err(get_err)?;
    let status: String = row.try_get("status").map_err(get_err)?;
    let project_id: Option<Uuid> = row.try_get("project_id").map_err(get_err)?;
    let steps: Json<Vec<JobStep>> = row.try_get("steps").map_err(get_err)?;
    let error: Option<Json<JobError>> = row.try_get("error").map_err(get_err)?;

    Ok(AgentJob {
        id: JobId::from_uuid(row.try_get("id").map_err(get_err)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(get_err)?),
        project_id: project_id.map(ProjectId::from_uuid),
        agent: AgentKind::from_str(&agent).map_err(|e| decode_error("job", e))?,
        input: row.try_get("input").map_err(get_err)?,
        status: JobStatus::from_str(&status).map_err(|e| decode_error("job", e))?,
        estimated_credits: row.try_get("estimated_credits").map_err(get_err)?,
        consumed_credits: row.try_get("consumed_credits").map_err(get_err)?,
        output: row.try_get("output").map_err(get_err)?,
        error: error.map(|e| e.0),
        steps: steps.0,
        created_at: row.try_get("created_at").map_err(get_err)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
        started_at: row.try_get("started_at").map_err(get_err)?,
        finished_at: row.try_get("finished_at").map_err(get_err)?,
    })
}

fn project_from_row(row: &PgRow) -> Result<VideoProject, StoreError> {
    let get_err = |e: sqlx::Error| decode_error("video project", e);
    let status: String = row.try_get("status").map_err(get_err)?;
    Ok(VideoProject {
        id: ProjectId::from_uuid(row.try_get("id").map_err(get_err)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(get_err)?),
        title: row.try_get("title").map_err(get_err)?,
        status: VideoStatus::parse(&status)
            .ok_or_else(|| decode_error("video project", format!("unknown status '{status}'")))?,
        output_url: row.try_get("output_url").map_err(get_err)?,
        error: row.try_get("error").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl UserStore for PostgresStore {
    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert(&self, user: User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, plan, credits, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*user.id.as_uuid())
        .bind(&user.email)
        .bind(user.plan.as_str())
        .bind(user.credits)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn set_plan(&self, id: UserId, plan: PlanTier) -> Result<User, StoreError> {
        let row = sqlx::query(
            "UPDATE users SET plan = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(*id.as_uuid())
        .bind(plan.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_plan", e))?;
        row.as_ref().map(user_from_row).transpose()?.ok_or(StoreError::NotFound)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn try_deduct(
        &self,
        id: UserId,
        amount: i64,
        reason: CreditReason,
        job_id: Option<JobId>,
    ) -> Result<i64, CreditError> {
        if amount <= 0 {
            return Err(CreditError::InvalidAmount(amount));
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE users SET credits = credits - $2, updated_at = now()
            WHERE id = $1 AND credits >= $2
            RETURNING credits
            "#,
        )
        .bind(*id.as_uuid())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("deduct_credits", e))?;

        let Some(balance) = balance else {
            let current: Option<i64> = sqlx::query_scalar("SELECT credits FROM users WHERE id = $1")
                .bind(*id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("read_balance", e))?;
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(match current {
                Some(balance) => CreditError::Insufficient {
                    balance,
                    required: amount,
                },
                None => CreditError::UserNotFound,
            });
        };

        insert_transaction(
            &mut tx,
            &CreditTransaction::new(id, -amount, balance, reason, job_id),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(balance)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn add_credits(
        &self,
        id: UserId,
        amount: i64,
        reason: CreditReason,
        job_id: Option<JobId>,
    ) -> Result<i64, CreditError> {
        if amount <= 0 {
            return Err(CreditError::InvalidAmount(amount));
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let balance: i64 = sqlx::query_scalar(
            "UPDATE users SET credits = credits + $2, updated_at = now() WHERE id = $1 RETURNING credits",
        )
        .bind(*id.as_uuid())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("add_credits", e))?
        .ok_or(CreditError::UserNotFound)?;

        insert_transaction(
            &mut tx,
            &CreditTransaction::new(id, amount, balance, reason, job_id),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(balance)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn history(&self, id: UserId, limit: usize) -> Result<Vec<CreditTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(*id.as_uuid())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("credit_history", e))?;
        rows.iter().map(transaction_from_row).collect()
    }
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    t: &CreditTransaction,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO credit_transactions (id, user_id, delta, balance_after, reason, job_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(t.id)
    .bind(*t.user_id.as_uuid())
    .bind(t.delta)
    .bind(t.balance_after)
    .bind(t.reason.as_str())
    .bind(t.job_id.map(|j| *j.as_uuid()))
    .bind(t.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_credit_transaction", e))?;
    Ok(())
}

#[async_trait]
impl JobStore for PostgresStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, user_id = %job.user_id), err)]
    async fn insert(&self, job: AgentJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agent_jobs (
                id, user_id, project_id, agent, input, status, estimated_credits,
                consumed_credits, output, error, steps, created_at, updated_at,
                started_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(*job.user_id.as_uuid())
        .bind(job.project_id.map(|p| *p.as_uuid()))
        .bind(job.agent.as_str())
        .bind(&job.input)
        .bind(job.status.as_str())
        .bind(job.estimated_credits)
        .bind(job.consumed_credits)
        .bind(&job.output)
        .bind(job.error.as_ref().map(Json))
        .bind(Json(&job.steps))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<AgentJob>, StoreError> {
        let row = sqlx::query("SELECT * FROM agent_jobs WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn update_active(&self, job: &AgentJob) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE agent_jobs SET
                status = $2,
                consumed_credits = $3,
                output = $4,
                error = $5,
                steps = $6,
                updated_at = $7,
                started_at = $8,
                finished_at = $9
            WHERE id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.consumed_credits)
        .bind(&job.output)
        .bind(job.error.as_ref().map(Json))
        .bind(Json(&job.steps))
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job", e))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM agent_jobs WHERE id = $1")
            .bind(*job.id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_job", e))?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<AgentJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM agent_jobs
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(*user_id.as_uuid())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;
        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn count_active(&self, user_id: UserId) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM agent_jobs WHERE user_id = $1 AND status IN ('queued', 'running')",
        )
        .bind(*user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_active_jobs", e))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl VideoProjectStore for PostgresStore {
    #[instrument(skip(self, project), fields(project_id = %project.id), err)]
    async fn insert(&self, project: VideoProject) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO video_projects (id, user_id, title, status, output_url, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*project.id.as_uuid())
        .bind(*project.user_id.as_uuid())
        .bind(&project.title)
        .bind(project.status.as_str())
        .bind(&project.output_url)
        .bind(&project.error)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_video_project", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(project_id = %id), err)]
    async fn get(&self, id: ProjectId) -> Result<Option<VideoProject>, StoreError> {
        let row = sqlx::query("SELECT * FROM video_projects WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_video_project", e))?;
        row.as_ref().map(project_from_row).transpose()
    }

    #[instrument(skip(self, output_url, error), fields(project_id = %id, status = %status), err)]
    async fn update_status(
        &self,
        id: ProjectId,
        status: VideoStatus,
        output_url: Option<String>,
        error: Option<String>,
    ) -> Result<VideoProject, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE video_projects
            SET status = $2, output_url = $3, error = $4, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(*id.as_uuid())
        .bind(status.as_str())
        .bind(output_url)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_video_status", e))?;
        row.as_ref()
            .map(project_from_row)
            .transpose()?
            .ok_or(StoreError::NotFound)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn list_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<VideoProject>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM video_projects
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(*user_id.as_uuid())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_video_projects", e))?;
        rows.iter().map(project_from_row).collect()
    }
}
