use std::{fmt, time::Duration};

use aliri::{jwa, jwk, jwt, Jwk, Jwt};
use aliri_clock::UnixTime;
use serde::{Deserialize, Serialize};

use crate::{ClientCredentialsConfig, ClientId, ClientIdRef, PrivateKeyPemRef, TokenRequestError};

/// The `client_assertion_type` announcing a private key JWT
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Claims of a client assertion
///
/// The client is both issuer and subject, and the identity provider is the
/// audience. Every assertion carries a fresh `jti`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    /// Issuer, the client ID
    pub iss: ClientId,
    /// Subject, the client ID
    pub sub: ClientId,
    /// Audience, the identity provider's issuer URL
    pub aud: jwt::Audience,
    /// Issued at
    pub iat: UnixTime,
    /// Expiration
    pub exp: UnixTime,
    /// Unique assertion ID
    pub jti: String,
}

impl ClientAssertionClaims {
    /// Constructs the claims for an assertion issued at `now`
    pub fn new(
        client_id: &ClientIdRef,
        audience: &jwt::AudienceRef,
        now: UnixTime,
        lifetime: Duration,
    ) -> Self {
        Self {
            iss: client_id.to_owned(),
            sub: client_id.to_owned(),
            aud: audience.to_owned(),
            iat: now,
            exp: UnixTime(now.0.saturating_add(lifetime.as_secs())),
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Signs client assertions with the service's RSA private key
pub struct AssertionSigner {
    key: Jwk,
    key_id: Option<jwk::KeyId>,
    client_id: ClientId,
    audience: jwt::Audience,
    lifetime: Duration,
}

impl fmt::Debug for AssertionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionSigner")
            .field("key_id", &self.key_id)
            .field("client_id", &self.client_id)
            .field("audience", &self.audience)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl AssertionSigner {
    /// Constructs a signer from a PEM-encoded RSA private key
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError::InvalidSigningKey`] if the key cannot be
    /// parsed.
    pub fn from_pem(
        pem: &PrivateKeyPemRef,
        client_id: ClientId,
        audience: jwt::Audience,
    ) -> Result<Self, TokenRequestError> {
        let pem = pem.normalized();
        let rsa = jwa::Rsa::private_key_from_pem(pem.as_str())
            .map_err(TokenRequestError::InvalidSigningKey)?;

        Ok(Self {
            key: Jwk::from(rsa).with_algorithm(jwa::Algorithm::RS256),
            key_id: None,
            client_id,
            audience,
            lifetime: Duration::from_secs(3600),
        })
    }

    /// Constructs a signer from the client credentials configuration
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError::MissingSigningKey`] if no key is
    /// configured, or [`TokenRequestError::InvalidSigningKey`] if it cannot be
    /// parsed.
    pub fn from_config(config: &ClientCredentialsConfig) -> Result<Self, TokenRequestError> {
        let pem = config
            .private_key
            .as_deref()
            .ok_or(TokenRequestError::MissingSigningKey)?;

        let signer = Self::from_pem(
            pem,
            config.client_id.clone(),
            jwt::Audience::new(config.issuer.as_str().to_owned()),
        )?
        .with_lifetime(config.assertion_lifetime());

        Ok(match &config.key_id {
            Some(kid) => signer.with_key_id(kid.clone()),
            None => signer,
        })
    }

    /// Announces the key ID in the assertion header
    pub fn with_key_id(mut self, key_id: jwk::KeyId) -> Self {
        self.key_id = Some(key_id);
        self
    }

    /// Sets how long each assertion stays valid
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// The claims of an assertion issued at `now`
    pub fn claims(&self, now: UnixTime) -> ClientAssertionClaims {
        ClientAssertionClaims::new(&self.client_id, &self.audience, now, self.lifetime)
    }

    /// Mints and signs a new assertion issued at `now`
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError::Signing`] if the assertion cannot be
    /// signed.
    pub fn sign(&self, now: UnixTime) -> Result<Jwt, TokenRequestError> {
        let claims = self.claims(now);
        let headers = match &self.key_id {
            Some(kid) => jwt::BasicHeaders::with_key_id(jwa::Algorithm::RS256, kid.clone()),
            None => jwt::BasicHeaders::new(jwa::Algorithm::RS256),
        };

        tracing::trace!(jti = %claims.jti, exp = claims.exp.0, "signing client assertion");

        Jwt::try_from_parts_with_signature(&headers, &claims, &self.key)
            .map_err(TokenRequestError::Signing)
    }
}
