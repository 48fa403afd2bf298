use std::{sync::Arc, time::Duration};

use aliri::{Jwt, JwtRef};
use aliri_clock::System;
use http::HeaderMap;

use crate::{
    AuthError, ConfigError, IdpConfig, Identity, Introspector, KeySetCache, LocalVerifier,
    RefreshTask, SharedClock, TokenVerifier,
};

/// The per-request entry point for authenticating callers
///
/// Reads the bearer token from the request headers and hands it to the
/// configured [`TokenVerifier`]. Cloning is cheap; clones share the same
/// verifier and key set cache.
#[derive(Clone, Debug)]
pub struct Authenticator {
    verifier: Arc<dyn TokenVerifier>,
}

impl Authenticator {
    /// Constructs an authenticator around a specific verification strategy
    pub fn new(verifier: impl TokenVerifier + 'static) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }

    /// Constructs an authenticator from the provider configuration
    ///
    /// Uses introspection if `use_introspection` is set, and local signature
    /// verification otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn from_config(config: &IdpConfig) -> Result<Self, ConfigError> {
        Self::from_config_with_clock(config, Arc::new(System))
    }

    /// Constructs an authenticator from the provider configuration, telling
    /// time with the given clock
    ///
    /// # Errors
    ///
    /// Returns an error if a configured URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn from_config_with_clock(
        config: &IdpConfig,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        if config.use_introspection {
            let introspector = Introspector::from_config(config)?.with_clock(clock);
            tracing::debug!(url = %introspector.url(), "authenticating tokens by introspection");
            return Ok(Self::new(introspector));
        }

        let keys = KeySetCache::builder(config.jwks_url()?)
            .client(config.http_client()?)
            .clock(clock)
            .ttl(config.jwks_ttl())
            .timeout(config.http_timeout())
            .build();

        tracing::debug!(jwks.url = %keys.jwks_url(), "authenticating tokens by signature");

        Ok(Self::new(LocalVerifier::new(
            keys,
            config.audience.clone(),
            config.issuer.clone(),
        )))
    }

    /// Authenticates the caller that sent these headers
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingAuthorization`] without contacting the
    /// provider if no bearer token is present, or the verifier's error if the
    /// token is not acceptable.
    #[tracing::instrument(skip_all)]
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = extract_bearer(headers).ok_or_else(|| {
            tracing::debug!("authorization token is missing or malformed");
            AuthError::MissingAuthorization
        })?;

        self.verify_token(&token).await
    }

    /// Verifies an already extracted bearer token
    ///
    /// # Errors
    ///
    /// Returns the verifier's error if the token is not acceptable.
    pub async fn verify_token(&self, token: &JwtRef) -> Result<Identity, AuthError> {
        let identity = self.verifier.verify(token).await?;
        tracing::trace!(sub = %identity.subject, "caller authenticated");
        Ok(identity)
    }

    /// Authenticates a request, attaching the caller's [`Identity`] to its
    /// extensions
    ///
    /// A request that already carries an identity is left untouched, so a
    /// token is verified at most once per request.
    ///
    /// # Errors
    ///
    /// Returns an error if the caller cannot be authenticated.
    pub async fn authenticate_request<B>(
        &self,
        request: &mut http::Request<B>,
    ) -> Result<(), AuthError> {
        if request.extensions().get::<Identity>().is_some() {
            tracing::trace!("request already authenticated");
            return Ok(());
        }

        let identity = self.authenticate(request.headers()).await?;
        request.extensions_mut().insert(identity);

        Ok(())
    }

    /// Starts refreshing the signing keys in the background
    ///
    /// Returns `None` when the strategy in use does not depend on signing keys.
    pub fn spawn_key_refresh(&self, interval: Duration) -> Option<RefreshTask> {
        self.verifier
            .key_set()
            .map(|keys| keys.spawn_refresh(interval))
    }

    /// The signing key cache in use, if tokens are verified locally
    pub fn key_set(&self) -> Option<&KeySetCache> {
        self.verifier.key_set()
    }
}

/// Extracts the bearer token from the `Authorization` header
///
/// The scheme is matched case-insensitively. Returns `None` if the header is
/// absent, uses another scheme, or carries an empty token.
pub fn extract_bearer(headers: &HeaderMap) -> Option<Jwt> {
    let auth = headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;

    if auth.len() <= 7 || !auth[..7].eq_ignore_ascii_case("bearer ") {
        return None;
    }

    let token = auth[7..].trim();
    if token.is_empty() {
        return None;
    }

    Some(Jwt::from(token))
}
