//! Bearer token verification against an OpenID Connect identity provider
//!
//! Tokens presented to an API are checked by one of two interchangeable
//! strategies, both of which produce the same normalized [`Identity`]:
//!
//! * [`LocalVerifier`] checks the token signature and standard claims against
//!   the provider's published JSON Web Key Set, held in a [`KeySetCache`].
//! * [`Introspector`] asks the provider's introspection endpoint whether the
//!   token is still active.
//!
//! The [`Authenticator`] is the single entry point used per request. It reads
//! the bearer token from the `Authorization` header and dispatches to the
//! configured strategy. Route-level requirements are then checked against the
//! identity's roles with a [`RolePolicy`].
//!
//! ```no_run
//! use keyward::{Authenticator, IdpConfig};
//!
//! # async fn run(headers: http::HeaderMap) -> Result<(), Box<dyn std::error::Error>> {
//! let config = IdpConfig::default();
//! let authenticator = Authenticator::from_config(&config)?;
//!
//! // Keep the signing keys warm in the background
//! let refresh = authenticator.spawn_key_refresh(config.jwks_refresh_interval());
//!
//! let identity = authenticator.authenticate(&headers).await?;
//! println!("authenticated {}", identity.subject);
//!
//! if let Some(refresh) = refresh {
//!     refresh.shutdown().await;
//! }
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
#![warn(trivial_casts)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::sync::Arc;

use aliri_clock::Clock;

mod braids;
mod config;
mod error;
mod guard;
mod identity;
mod introspect;
pub mod key_set;
mod local;
mod policy;
mod verifier;

#[cfg(test)]
mod test_support;

pub use braids::*;
pub use config::{ConfigError, IdpConfig};
pub use error::AuthError;
pub use guard::{extract_bearer, Authenticator};
pub use identity::{HasRoles, Identity, Role, RoleRef, RoleSet};
pub use introspect::{IntrospectionResult, Introspector, PROJECT_ROLES_CLAIM};
pub use key_set::{KeySet, KeySetCache, KeySetError, RefreshTask};
pub use local::LocalVerifier;
pub use policy::{matches, InsufficientRoles, RolePolicy};
pub use verifier::TokenVerifier;

/// A clock shared between the components that need to tell time
pub type SharedClock = Arc<dyn Clock + Send + Sync>;
