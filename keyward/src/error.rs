use http::StatusCode;
use thiserror::Error;

use crate::KeySetError;

/// A bearer token could not be accepted
///
/// The rendered messages are safe to return to the caller. Causes of
/// signature and claim failures are kept as the error [`source`] for logging
/// but are never part of the message.
///
/// [`source`]: std::error::Error::source
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No `Authorization: Bearer` header was presented
    #[error("Missing Authorization header")]
    MissingAuthorization,

    /// The token names a signing key that the provider does not publish
    #[error("Invalid key ID")]
    UnknownKeyId,

    /// The token is malformed, its signature does not verify, or its claims
    /// do not match the expected audience or issuer
    #[error("Invalid token")]
    InvalidToken {
        /// The underlying verification failure, if any
        #[source]
        source: Option<aliri::error::JwtVerifyError>,
    },

    /// The token's `exp` claim is in the past
    #[error("Token has expired.")]
    TokenExpired,

    /// The provider reported the token as no longer active
    #[error("Invalid token (active: false)")]
    Inactive,

    /// The introspection endpoint could not be reached or gave an unusable
    /// answer
    #[error("Invalid token")]
    Introspection(#[source] reqwest::Error),

    /// The caller's roles do not satisfy the route's requirements
    #[error("Token has insufficient scope. Route requires: {required}")]
    InsufficientScope {
        /// The role groups that would have been accepted
        required: String,
    },

    /// Signing keys could not be obtained from the provider
    #[error("unable to obtain signing keys from the identity provider")]
    KeySet(#[from] KeySetError),
}

impl AuthError {
    pub(crate) fn invalid_token(source: aliri::error::JwtVerifyError) -> Self {
        Self::InvalidToken {
            source: Some(source),
        }
    }

    pub(crate) const fn missing_claim() -> Self {
        Self::InvalidToken { source: None }
    }

    /// The HTTP status that should be returned to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::KeySet(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// A machine-readable error code
    ///
    /// These follow the RFC 6750 error codes, except that an expired token is
    /// distinguished as `invalid_token_expired`.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingAuthorization => "invalid_request",
            Self::TokenExpired => "invalid_token_expired",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::KeySet(_) => "server_error",
            _ => "invalid_token",
        }
    }
}
