//! Users, plans and the credit ledger.
//!
//! The `credits` column is the balance; `CreditTransaction` rows are the audit
//! trail. Deduction is check-and-deduct in one atomic step in every store, so a
//! balance never goes negative.

pub mod in_memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use productify_auth::PlanTier;
use productify_core::{JobId, UserId};

use crate::error::StoreError;

pub use in_memory::InMemoryUserStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub plan: PlanTier,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A fresh account with zero balance; grants go through the ledger.
    pub fn new(email: impl Into<String>, plan: PlanTier) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            email: email.into(),
            plan,
            credits: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    AgentExecution,
    Refill,
    SignupGrant,
    Refund,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::AgentExecution => "agent_execution",
            CreditReason::Refill => "refill",
            CreditReason::SignupGrant => "signup_grant",
            CreditReason::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent_execution" => Some(CreditReason::AgentExecution),
            "refill" => Some(CreditReason::Refill),
            "signup_grant" => Some(CreditReason::SignupGrant),
            "refund" => Some(CreditReason::Refund),
            _ => None,
        }
    }
}

/// One balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    /// Negative for deductions.
    pub delta: i64,
    pub balance_after: i64,
    pub reason: CreditReason,
    pub job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(
        user_id: UserId,
        delta: i64,
        balance_after: i64,
        reason: CreditReason,
        job_id: Option<JobId>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            delta,
            balance_after,
            reason,
            job_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CreditError {
    #[error("insufficient credits: balance {balance}, required {required}")]
    Insufficient { balance: i64, required: i64 },

    #[error("user not found")]
    UserNotFound,

    #[error("credit amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Insert a new user. Emails are unique.
    async fn insert(&self, user: User) -> Result<(), StoreError>;

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Overwrite the plan (billing webhooks do exactly this).
    async fn set_plan(&self, id: UserId, plan: PlanTier) -> Result<User, StoreError>;

    /// Atomically deduct `amount` if and only if the balance covers it.
    /// Returns the new balance.
    async fn try_deduct(
        &self,
        id: UserId,
        amount: i64,
        reason: CreditReason,
        job_id: Option<JobId>,
    ) -> Result<i64, CreditError>;

    /// Add `amount` credits (grant, refill, refund). Returns the new balance.
    async fn add_credits(
        &self,
        id: UserId,
        amount: i64,
        reason: CreditReason,
        job_id: Option<JobId>,
    ) -> Result<i64, CreditError>;

    /// Newest first.
    async fn history(&self, id: UserId, limit: usize) -> Result<Vec<CreditTransaction>, StoreError>;
}

/// Create an account and grant the plan's signup credits.
pub async fn register_user(
    store: &dyn UserStore,
    email: &str,
    plan: PlanTier,
) -> Result<User, CreditError> {
    let email = email.trim().to_ascii_lowercase();
    let mut user = User::new(email, plan);
    store.insert(user.clone()).await?;

    let grant = plan.limits().credit_grant;
    user.credits = store
        .add_credits(user.id, grant, CreditReason::SignupGrant, None)
        .await?;
    tracing::info!(user_id = %user.id, plan = %plan, credits = user.credits, "user registered");
    Ok(user)
}

/// Top the balance up by the plan's grant.
pub async fn refill_credits(store: &dyn UserStore, id: UserId) -> Result<i64, CreditError> {
    let user = store.get(id).await?.ok_or(CreditError::UserNotFound)?;
    store
        .add_credits(id, user.plan.limits().credit_grant, CreditReason::Refill, None)
        .await
}
