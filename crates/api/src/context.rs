use productify_auth::PlanTier;
use productify_core::UserId;
use productify_infra::users::User;

/// The resolved caller of a request.
///
/// Inserted by `user_context_middleware`; every authenticated route reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    user: User,
}

impl UserContext {
    pub fn new(user: User) -> Self {
        Self { user }
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn plan(&self) -> PlanTier {
        self.user.plan
    }

    /// The user row as loaded for this request.
    pub fn user(&self) -> &User {
        &self.user
    }
}
