use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use productify_auth::PlanTier;
use productify_core::{JobId, UserId};

use super::{CreditError, CreditReason, CreditTransaction, User, UserStore};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Ledger {
    users: HashMap<UserId, User>,
    history: Vec<CreditTransaction>,
}

/// In-memory user store for tests/dev (`MOCK_DB`).
///
/// One lock covers balances and history, so check-and-deduct is atomic.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    inner: RwLock<Ledger>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: User) -> Result<(), StoreError> {
        let mut ledger = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if ledger.users.contains_key(&user.id) || ledger.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::AlreadyExists(user.email));
        }
        ledger.users.insert(user.id, user);
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let ledger = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ledger.users.get(&id).cloned())
    }

    async fn set_plan(&self, id: UserId, plan: PlanTier) -> Result<User, StoreError> {
        let mut ledger = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let user = ledger.users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.plan = plan;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

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
        let mut ledger = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let user = ledger.users.get_mut(&id).ok_or(CreditError::UserNotFound)?;
        if user.credits < amount {
            return Err(CreditError::Insufficient {
                balance: user.credits,
                required: amount,
            });
        }
        user.credits -= amount;
        user.updated_at = Utc::now();
        let balance = user.credits;
        ledger
            .history
            .push(CreditTransaction::new(id, -amount, balance, reason, job_id));
        Ok(balance)
    }

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
        let mut ledger = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let user = ledger.users.get_mut(&id).ok_or(CreditError::UserNotFound)?;
        user.credits += amount;
        user.updated_at = Utc::now();
        let balance = user.credits;
        ledger
            .history
            .push(CreditTransaction::new(id, amount, balance, reason, job_id));
        Ok(balance)
    }

    async fn history(&self, id: UserId, limit: usize) -> Result<Vec<CreditTransaction>, StoreError> {
        let ledger = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ledger
            .history
            .iter()
            .rev()
            .filter(|t| t.user_id == id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::users::{refill_credits, register_user};
    use proptest::prelude::*;

    #[tokio::test]
    async fn registration_grants_plan_credits() {
        let store = InMemoryUserStore::new();
        let user = register_user(&store, "Writer@Example.com", PlanTier::Plus).await.unwrap();

        assert_eq!(user.email, "writer@example.com");
        assert_eq!(user.credits, 200);

        let history = store.history(user.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, CreditReason::SignupGrant);
        assert_eq!(history[0].balance_after, 200);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryUserStore::new();
        register_user(&store, "a@example.com", PlanTier::Free).await.unwrap();
        let err = register_user(&store, "A@example.com", PlanTier::Free).await.unwrap_err();
        assert!(matches!(err, CreditError::Store(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn deduction_refuses_to_overdraw() {
        let store = InMemoryUserStore::new();
        let user = register_user(&store, "b@example.com", PlanTier::Free).await.unwrap();

        assert_eq!(
            store.try_deduct(user.id, 4, CreditReason::AgentExecution, None).await,
            Ok(6)
        );
        assert_eq!(
            store.try_deduct(user.id, 7, CreditReason::AgentExecution, None).await,
            Err(CreditError::Insufficient { balance: 6, required: 7 })
        );

        let history = store.history(user.id, 10).await.unwrap();
        assert_eq!(history.len(), 2, "failed deduction must not be recorded");
        assert_eq!(history[0].delta, -4);
    }

    #[tokio::test]
    async fn refill_adds_plan_grant() {
        let store = InMemoryUserStore::new();
        let user = register_user(&store, "c@example.com", PlanTier::Free).await.unwrap();
        store.set_plan(user.id, PlanTier::Pro).await.unwrap();

        assert_eq!(refill_credits(&store, user.id).await, Ok(1010));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deductions_never_overdraw() {
        let store = Arc::new(InMemoryUserStore::new());
        let user = register_user(store.as_ref(), "d@example.com", PlanTier::Free).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_deduct(user.id, 3, CreditReason::AgentExecution, None).await
            }));
        }

        let mut succeeded = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 3, "10 credits cover exactly three deductions of 3");
        assert_eq!(store.get(user.id).await.unwrap().unwrap().credits, 1);
    }

    proptest! {
        #[test]
        fn balance_never_negative(ops in proptest::collection::vec((any::<bool>(), 1i64..50), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryUserStore::new();
                let user = register_user(&store, "p@example.com", PlanTier::Free).await.unwrap();
                let mut expected = user.credits;

                for (deduct, amount) in ops {
                    if deduct {
                        let before = expected;
                        match store.try_deduct(user.id, amount, CreditReason::AgentExecution, None).await {
                            Ok(balance) => {
                                expected -= amount;
                                assert_eq!(balance, expected);
                                assert!(amount <= before);
                            }
                            Err(CreditError::Insufficient { balance, .. }) => {
                                assert_eq!(balance, before);
                                assert!(amount > before);
                            }
                            Err(other) => panic!("unexpected error: {other}"),
                        }
                    } else {
                        expected = store
                            .add_credits(user.id, amount, CreditReason::Refill, None)
                            .await
                            .unwrap();
                    }
                    assert!(expected >= 0);
                }

                let stored = store.get(user.id).await.unwrap().unwrap();
                assert_eq!(stored.credits, expected);
            });
        }
    }
}
