//! Token acquisition from an OpenID Connect identity provider
//!
//! Two flows are supported:
//!
//! * The browser-based authorization code flow. [`AuthorizationCodeClient`]
//!   builds the authorization URL together with an anti-forgery
//!   [`AuthzState`], and later exchanges the returned code for tokens.
//! * The client credentials flow for service-to-service calls, where the
//!   service authenticates itself with a signed JWT assertion instead of a
//!   shared secret. See [`ClientCredentialsClient`].
//!
//! Both flows return the provider's [`TokenResponse`] unchanged. Failures are
//! reported as a [`TokenRequestError`], which knows the HTTP status and body
//! that should be relayed to the caller.
//!
//! ```no_run
//! use keyward_tokens::{AuthorizationCodeClient, AuthorizationCodeConfig, StateStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = AuthorizationCodeClient::new(AuthorizationCodeConfig::default())?
//!     .with_state_store(StateStore::new());
//!
//! let (url, state) = client.authorization_request();
//! println!("send the browser to {url}");
//!
//! // ...once the provider redirects back with `code` and `state`
//! # let code = keyward_tokens::AuthorizationCode::from_static("code");
//! let tokens = client.exchange_code(&code, Some(&state)).await?;
//! println!("token type {}", tokens.token_type);
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

mod assertion;
mod authorization_code;
mod client_credentials;
mod config;
pub mod dto;
mod error;
mod request;
mod state;

pub use assertion::{AssertionSigner, ClientAssertionClaims, CLIENT_ASSERTION_TYPE};
pub use authorization_code::AuthorizationCodeClient;
pub use client_credentials::ClientCredentialsClient;
pub use config::{AuthorizationCodeConfig, ClientCredentialsConfig};
pub use dto::{CallbackParams, TokenResponse};
pub use error::TokenRequestError;
pub use keyward::{
    AccessToken, AccessTokenRef, AuthorizationCode, AuthorizationCodeRef, ClientId, ClientIdRef,
    ClientSecret, ClientSecretRef, IdToken, IdTokenRef, PrivateKeyPem, PrivateKeyPemRef,
    RefreshToken, RefreshTokenRef,
};
pub use state::{AuthzState, AuthzStateRef, StateStore};
