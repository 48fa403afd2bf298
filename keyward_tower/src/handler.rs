use http::Response;
use keyward::{AuthError, KeySetError, RolePolicy};

use crate::{
    util::{insufficient_scope, server_error, unauthorized},
    TerseErrorHandler, VerboseErrorHandler,
};

/// Handler for responding to failures while authenticating a request
pub trait OnAuthError {
    /// The body type returned on an error
    type Body;

    /// Response when the bearer token was not found or was otherwise malformed
    fn on_missing_or_malformed(&self) -> Response<Self::Body>;

    /// Response when the token names a signing key the provider does not
    /// publish
    fn on_no_matching_jwk(&self) -> Response<Self::Body>;

    /// Response when the token was judged invalid, expired, or inactive
    fn on_token_rejected(&self, error: &AuthError) -> Response<Self::Body>;

    /// Response when signing keys could not be obtained at all
    fn on_key_set_unavailable(&self, error: &KeySetError) -> Response<Self::Body>;

    /// Response when the caller's roles do not satisfy the route's policy
    fn on_insufficient_roles(&self, policy: &RolePolicy, error: &AuthError)
        -> Response<Self::Body>;
}

macro_rules! delegate_impls {
    ($($ty:ty)*) => {
        $(
            impl<T> OnAuthError for $ty
            where
                T: OnAuthError,
            {
                type Body = T::Body;

                fn on_missing_or_malformed(&self) -> Response<Self::Body> {
                    T::on_missing_or_malformed(self)
                }

                fn on_no_matching_jwk(&self) -> Response<Self::Body> {
                    T::on_no_matching_jwk(self)
                }

                fn on_token_rejected(&self, error: &AuthError) -> Response<Self::Body> {
                    T::on_token_rejected(self, error)
                }

                fn on_key_set_unavailable(&self, error: &KeySetError) -> Response<Self::Body> {
                    T::on_key_set_unavailable(self, error)
                }

                fn on_insufficient_roles(
                    &self,
                    policy: &RolePolicy,
                    error: &AuthError,
                ) -> Response<Self::Body> {
                    T::on_insufficient_roles(self, policy, error)
                }
            }
        )*
    }
}

delegate_impls!(
    &'_ T
    Box<T>
    std::rc::Rc<T>
    std::sync::Arc<T>
);

/// Routes an authentication failure to the matching handler method
pub(crate) fn respond<H>(handler: &H, error: &AuthError) -> Response<H::Body>
where
    H: OnAuthError,
{
    match error {
        AuthError::MissingAuthorization => handler.on_missing_or_malformed(),
        AuthError::UnknownKeyId => handler.on_no_matching_jwk(),
        AuthError::KeySet(err) => handler.on_key_set_unavailable(err),
        other => handler.on_token_rejected(other),
    }
}

impl<ResBody> OnAuthError for TerseErrorHandler<ResBody>
where
    ResBody: Default,
{
    type Body = ResBody;

    #[inline]
    fn on_missing_or_malformed(&self) -> Response<Self::Body> {
        tracing::debug!("authentication failed: bearer token is missing or malformed");
        unauthorized("invalid_request", "")
    }

    #[inline]
    fn on_no_matching_jwk(&self) -> Response<Self::Body> {
        tracing::debug!("authentication failed: token signing key (kid) is not trusted");
        unauthorized("invalid_token", "")
    }

    #[inline]
    fn on_token_rejected(&self, error: &AuthError) -> Response<Self::Body> {
        tracing::debug!(code = error.error_code(), "authentication failed");
        unauthorized(error.error_code(), "")
    }

    #[inline]
    fn on_key_set_unavailable(&self, _: &KeySetError) -> Response<Self::Body> {
        tracing::debug!("authentication failed: signing keys are unavailable");
        server_error()
    }

    #[inline]
    fn on_insufficient_roles(&self, policy: &RolePolicy, _: &AuthError) -> Response<Self::Body> {
        tracing::debug!("authorization failed: insufficient roles");
        insufficient_scope("", Some(policy))
    }
}

impl<ResBody> OnAuthError for VerboseErrorHandler<ResBody>
where
    ResBody: Default,
{
    type Body = ResBody;

    #[inline]
    fn on_missing_or_malformed(&self) -> Response<Self::Body> {
        let error = AuthError::MissingAuthorization;
        tracing::debug!("authentication failed: {error}");
        unauthorized(error.error_code(), &error.to_string())
    }

    #[inline]
    fn on_no_matching_jwk(&self) -> Response<Self::Body> {
        let error = AuthError::UnknownKeyId;
        tracing::debug!("authentication failed: {error}");
        unauthorized(error.error_code(), &error.to_string())
    }

    #[inline]
    fn on_token_rejected(&self, error: &AuthError) -> Response<Self::Body> {
        // The rendered message never includes the underlying cause
        let message = error.to_string();
        tracing::debug!("authentication failed: {message}");
        unauthorized(error.error_code(), &message)
    }

    #[inline]
    fn on_key_set_unavailable(&self, error: &KeySetError) -> Response<Self::Body> {
        tracing::debug!("authentication failed: {error}");
        server_error()
    }

    #[inline]
    fn on_insufficient_roles(
        &self,
        policy: &RolePolicy,
        error: &AuthError,
    ) -> Response<Self::Body> {
        let message = error.to_string();
        tracing::debug!("authorization failed: {message}");
        insufficient_scope(&message, Some(policy))
    }
}
