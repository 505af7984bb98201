//! The network seam of the session resolver.

use std::future::Future;

use crate::api::{ApiClient, ApiError, Credentials, LoginOutcome, SessionUser};

/// Authentication calls the resolver depends on.
pub trait AuthBackend: Send + Sync {
    /// Exchange credentials for a token and user.
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<LoginOutcome, ApiError>> + Send;

    /// Confirm the identity behind `token`.
    fn current_user(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<SessionUser>, ApiError>> + Send;
}

impl AuthBackend for ApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome, ApiError> {
        ApiClient::login(self, credentials).await
    }

    async fn current_user(&self, token: &str) -> Result<Option<SessionUser>, ApiError> {
        ApiClient::current_user(self, token).await
    }
}
