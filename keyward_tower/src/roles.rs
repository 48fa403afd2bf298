use std::fmt;

use http::{Request, Response};
use keyward::{HasRoles, Identity, RolePolicy};
use tower_http::validate_request::ValidateRequest;

use crate::OnAuthError;

/// Checks the roles of the authenticated caller against a policy
///
/// The caller's [`Identity`] is expected to have already been attached by an
/// [`AuthenticateRequest`](crate::AuthenticateRequest) layer. A request
/// without one is treated as unauthenticated.
pub struct RequireRoles<OnError> {
    policy: RolePolicy,
    on_error: OnError,
}

impl<OnError> RequireRoles<OnError> {
    pub(crate) fn new(policy: RolePolicy, on_error: OnError) -> Self {
        Self { policy, on_error }
    }
}

impl<OnError> Clone for RequireRoles<OnError>
where
    OnError: Clone,
{
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<OnError> fmt::Debug for RequireRoles<OnError>
where
    OnError: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequireRoles")
            .field("policy", &self.policy)
            .field("on_error", &self.on_error)
            .finish()
    }
}

impl<OnError, ReqBody> ValidateRequest<ReqBody> for RequireRoles<OnError>
where
    OnError: OnAuthError,
    OnError::Body: Default,
{
    type ResponseBody = OnError::Body;

    fn validate(
        &mut self,
        request: &mut Request<ReqBody>,
    ) -> Result<(), Response<Self::ResponseBody>> {
        let identity = request
            .extensions()
            .get::<Identity>()
            .ok_or_else(|| self.on_error.on_missing_or_malformed())?;

        tracing::trace!(roles = ?identity.roles(), policy = %self.policy, "evaluating role policy");

        self.policy
            .check(identity.roles())
            .map_err(|err| self.on_error.on_insufficient_roles(&self.policy, &err))
    }
}
