//! Axum utilities that make it easier to authenticate callers and enforce
//! role requirements in your application.
//!
//! Handlers ask for the caller with the [`CurrentUser`] extractor, or for a
//! caller holding specific roles with a guard declared by [`role_guard!`] or
//! [`role_guards!`]. Both reuse an [`Identity`] already attached by the
//! `keyward_tower` layer, and otherwise authenticate the request with an
//! [`Authenticator`] found in the request extensions.
//!
//! # Full Example
//!
//! ```no_run
//! use axum::{routing::get, Extension, Router};
//! use keyward::{Authenticator, IdpConfig};
//! use keyward_axum::CurrentUser;
//! use std::net::SocketAddr;
//!
//! mod role {
//!     keyward_axum::role_guards! {
//!         pub role Admin = "admin";
//!         pub role Auditor = ["ops audit" || "admin"];
//!     }
//! }
//!
//! async fn whoami(CurrentUser(user): CurrentUser) -> String {
//!     format!("Hello, {}!", user.subject)
//! }
//!
//! async fn admin_action(guard: role::Admin) -> String {
//!     format!("You're an admin, {}!", guard.identity().subject)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IdpConfig::default();
//!     let authenticator = Authenticator::from_config(&config)?;
//!     let refresh = authenticator.spawn_key_refresh(config.jwks_refresh_interval());
//!
//!     let router = Router::new()
//!         .route("/me", get(whoami))
//!         .route("/admin", get(admin_action))
//!         .layer(Extension(authenticator));
//!
//!     let listener = tokio::net::TcpListener::bind(&SocketAddr::new([0, 0, 0, 0].into(), 8000))
//!         .await?;
//!     axum::serve(listener, router).await?;
//!
//!     if let Some(refresh) = refresh {
//!         refresh.shutdown().await;
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![warn(trivial_casts)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{error::Error, fmt};

use async_trait::async_trait;
use axum_core::{
    body::Body,
    extract::FromRequestParts,
    response::{IntoResponse, Response},
};
use http::{header, request::Parts, HeaderValue, StatusCode};
use keyward::{AuthError, Identity, RolePolicy};
use keyward_tokens::TokenRequestError;
use keyward_tower::util;

#[cfg(doc)]
use keyward::Authenticator;

mod macros;

/// Defines a role policy for a given endpoint guard
pub trait RoleGuardPolicy {
    /// The role policy to be enforced when this type is used as an endpoint
    /// guard
    fn role_policy() -> &'static RolePolicy;
}

/// The authenticated caller
///
/// Rejects the request with `401 Unauthorized` if the caller cannot be
/// authenticated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentUser(pub Identity);

impl CurrentUser {
    /// Unwraps the caller's identity
    pub fn into_identity(self) -> Identity {
        self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthFailed;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        __private::identity(parts).await.map(Self)
    }
}

/// An error indicating that the request could not be authorized
#[derive(Debug)]
#[non_exhaustive]
pub enum AuthFailed {
    /// Neither an identity nor an [`Authenticator`] was attached to the
    /// request
    MissingAuthenticator,

    /// The caller could not be authenticated
    Unauthenticated(AuthError),

    /// The caller's roles did not satisfy the route's policy
    InsufficientRoles {
        /// The policy that was not satisfied
        policy: &'static RolePolicy,
    },
}

impl From<AuthError> for AuthFailed {
    fn from(err: AuthError) -> Self {
        Self::Unauthenticated(err)
    }
}

impl fmt::Display for AuthFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailed::MissingAuthenticator => f.write_str("authentication is not configured"),
            AuthFailed::Unauthenticated(err) => fmt::Display::fmt(err, f),
            AuthFailed::InsufficientRoles { policy } => write!(
                f,
                "Token has insufficient scope. Route requires: {}",
                policy
            ),
        }
    }
}

impl Error for AuthFailed {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AuthFailed::Unauthenticated(err) => Some(err),
            _ => None,
        }
    }
}

impl IntoResponse for AuthFailed {
    fn into_response(self) -> Response {
        let detail = self.to_string();

        let resp = match &self {
            AuthFailed::MissingAuthenticator => {
                tracing::error!("no authenticator was attached to the request");
                util::server_error()
            }
            AuthFailed::Unauthenticated(err) if err.status_code().is_server_error() => {
                util::server_error()
            }
            AuthFailed::Unauthenticated(err) => util::unauthorized(err.error_code(), &detail),
            AuthFailed::InsufficientRoles { policy } => {
                util::insufficient_scope(&detail, Some(*policy))
            }
        };

        with_json_body(resp, serde_json::json!({ "detail": detail }).to_string())
    }
}

/// A token request that failed, ready to be relayed to the caller
///
/// Errors returned by the identity provider keep their status and body.
/// Anything else becomes a JSON `{"detail": ...}` body.
#[derive(Debug)]
pub struct TokenFailure(pub TokenRequestError);

impl From<TokenRequestError> for TokenFailure {
    fn from(err: TokenRequestError) -> Self {
        Self(err)
    }
}

impl fmt::Display for TokenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for TokenFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

impl IntoResponse for TokenFailure {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::warn!(error = &self.0 as &dyn Error, "token request failed");
        }

        let body = match &self.0 {
            TokenRequestError::Upstream { body, .. } => body.clone(),
            err => serde_json::json!({ "detail": err.body() }).to_string(),
        };

        let mut resp = with_json_body(Response::new(Body::empty()), body);
        *resp.status_mut() = status;
        resp
    }
}

fn with_json_body(resp: Response, body: String) -> Response {
    let (mut parts, _) = resp.into_parts();
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(body))
}

#[doc(hidden)]
pub mod __private {
    use aliri_traits::Policy;
    pub use async_trait::async_trait;
    pub use axum_core::extract::FromRequestParts;
    pub use http::request::Parts;
    use keyward::{Authenticator, HasRoles};
    pub use keyward::{Identity, RolePolicy};
    pub use once_cell::sync::OnceCell;

    use crate::AuthFailed;

    pub async fn identity(req: &mut Parts) -> Result<Identity, AuthFailed> {
        if let Some(identity) = req.extensions.get::<Identity>() {
            return Ok(identity.clone());
        }

        let authenticator = req
            .extensions
            .get::<Authenticator>()
            .cloned()
            .ok_or(AuthFailed::MissingAuthenticator)?;

        let identity = authenticator.authenticate(&req.headers).await?;
        req.extensions.insert(identity.clone());

        Ok(identity)
    }

    pub async fn from_request(
        req: &mut Parts,
        policy: &'static RolePolicy,
    ) -> Result<Identity, AuthFailed> {
        let identity = identity(req).await?;

        policy.evaluate(identity.roles()).map_err(|_| {
            tracing::debug!(required = %policy, "caller lacks required roles");
            AuthFailed::InsufficientRoles { policy }
        })?;

        Ok(identity)
    }
}
