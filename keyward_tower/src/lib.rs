//! Layers for authenticating bearer tokens with `tower_http` and other
//! constructs in the ecosystem, including `axum`.
//!
//! An [`Authorizer`] wraps a [`keyward::Authenticator`] and produces two kinds
//! of layer:
//!
//! * [`Authorizer::authenticate_layer`] verifies the bearer token on each
//!   request and attaches the caller's [`Identity`][keyward::Identity] to the
//!   request extensions.
//! * [`Authorizer::role_layer`] checks that identity against a
//!   [`RolePolicy`][keyward::RolePolicy] for a specific route.
//!
//! ```no_run
//! use axum::routing::get;
//! use keyward::{Authenticator, IdpConfig, RolePolicy};
//! use keyward_tower::Authorizer;
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let authenticator = Authenticator::from_config(&IdpConfig::default())?;
//! let authorizer = Authorizer::new(authenticator)
//!     .with_verbose_error_handler::<axum::body::Body>()
//!     .excluding_path_prefix("/health");
//!
//! let app: axum::Router = axum::Router::new()
//!     .route(
//!         "/admin",
//!         get(|| async { "hello admin" })
//!             .layer(authorizer.role_layer(RolePolicy::allow_one("admin"))),
//!     )
//!     .route("/me", get(|| async { "hello" }))
//!     .route("/health", get(|| async { "ok" }))
//!     .layer(authorizer.authenticate_layer());
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{fmt, marker::PhantomData};

mod authenticate;
mod authorizer;
mod handler;
mod roles;
pub mod util;

pub use authenticate::AuthenticateRequest;
pub use authorizer::Authorizer;
pub use handler::OnAuthError;
pub use roles::RequireRoles;

/// Terse error handler
///
/// Responds with the status code and a `www-authenticate` challenge that
/// carries only the error code.
pub struct TerseErrorHandler<ResBody = http_body_util::Empty<bytes::Bytes>> {
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> TerseErrorHandler<ResBody> {
    /// Instantiates a new instance over a given body type
    #[inline]
    pub fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> fmt::Debug for TerseErrorHandler<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("TerseErrorHandler")
    }
}

impl<ResBody> Default for TerseErrorHandler<ResBody> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<ResBody> Clone for TerseErrorHandler<ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<ResBody> Copy for TerseErrorHandler<ResBody> {}

/// Verbose error handler
///
/// Like [`TerseErrorHandler`], but the challenge also carries an
/// `error_description` with the caller-safe failure message.
pub struct VerboseErrorHandler<ResBody = http_body_util::Empty<bytes::Bytes>> {
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> VerboseErrorHandler<ResBody> {
    /// Instantiates a new instance over a given body type
    #[inline]
    pub fn new() -> Self {
        Self { _ty: PhantomData }
    }
}

impl<ResBody> fmt::Debug for VerboseErrorHandler<ResBody> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("VerboseErrorHandler")
    }
}

impl<ResBody> Default for VerboseErrorHandler<ResBody> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<ResBody> Clone for VerboseErrorHandler<ResBody> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<ResBody> Copy for VerboseErrorHandler<ResBody> {}
