use aliri::{
    jwa,
    jwt::{self, CoreClaims, CoreHeaders, HasAlgorithm},
    JwtRef,
};
use aliri_clock::UnixTime;
use async_trait::async_trait;
use serde::Deserialize;

use crate::{AuthError, Identity, KeySetCache, RoleSet, TokenVerifier};

/// The claims read from a locally verified token
///
/// Only the claims that feed the normalized identity are kept; anything
/// else in the payload is ignored.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(flatten)]
    basic: jwt::BasicClaims,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default, rename = "urn:zitadel:iam:org:project:roles")]
    project_roles: Option<RoleSet>,
    #[serde(default)]
    roles: Option<RoleSet>,
}

impl CoreClaims for TokenClaims {
    fn nbf(&self) -> Option<UnixTime> {
        self.basic.nbf()
    }

    fn exp(&self) -> Option<UnixTime> {
        self.basic.exp()
    }

    fn aud(&self) -> &jwt::Audiences {
        self.basic.aud()
    }

    fn iss(&self) -> Option<&jwt::IssuerRef> {
        self.basic.iss()
    }

    fn sub(&self) -> Option<&jwt::SubjectRef> {
        self.basic.sub()
    }
}

/// Verifies RS256-signed tokens against the provider's published keys
#[derive(Clone, Debug)]
pub struct LocalVerifier {
    keys: KeySetCache,
    validator: jwt::CoreValidator,
}

impl LocalVerifier {
    /// Constructs a verifier that accepts tokens for `audience` issued by
    /// `issuer`
    pub fn new(keys: KeySetCache, audience: jwt::Audience, issuer: jwt::Issuer) -> Self {
        // Expiry is judged against the cache's clock below
        let validator = jwt::CoreValidator::default()
            .add_approved_algorithm(jwa::Algorithm::RS256)
            .add_allowed_audience(audience)
            .require_issuer(issuer)
            .ignore_expiration();

        Self { keys, validator }
    }
}

#[async_trait]
impl TokenVerifier for LocalVerifier {
    #[tracing::instrument(skip_all)]
    async fn verify(&self, token: &JwtRef) -> Result<Identity, AuthError> {
        let decomposed = token
            .decompose::<jwt::BasicHeaders>()
            .map_err(|err| {
                tracing::debug!("JWT validation failed: token is malformed");
                AuthError::invalid_token(err)
            })?;

        let alg = decomposed.alg();
        let kid = decomposed.kid().map(ToOwned::to_owned).ok_or_else(|| {
            tracing::debug!(%alg, "JWT validation failed: token names no signing key");
            AuthError::UnknownKeyId
        })?;

        let keys = self.keys.keys().await?;
        let key = keys.jwks().get_key_by_id(&kid, alg).ok_or_else(|| {
            tracing::debug!(%kid, %alg, "JWT validation failed: unable to find matching key");
            AuthError::UnknownKeyId
        })?;

        let validated: jwt::Validated<TokenClaims> = decomposed
            .verify(key, &self.validator)
            .map_err(|err| {
                tracing::debug!(%kid, "JWT validation failed: signature or claims rejected");
                AuthError::invalid_token(err)
            })?;

        let (_, claims) = validated.extract();

        let now = self.keys.clock().now();
        if let Some(exp) = claims.exp() {
            if exp < now {
                tracing::debug!(exp = exp.0, now = now.0, "JWT validation failed: token expired");
                return Err(AuthError::TokenExpired);
            }
        }

        let subject = claims
            .sub()
            .map(ToOwned::to_owned)
            .ok_or_else(AuthError::missing_claim)?;

        tracing::trace!(sub = %subject, "jwt was valid");

        Ok(Identity {
            subject,
            email: claims.email,
            display_name: claims.preferred_username,
            roles: claims
                .project_roles
                .or(claims.roles)
                .unwrap_or_default(),
            expires_at: claims.basic.exp(),
        })
    }

    fn key_set(&self) -> Option<&KeySetCache> {
        Some(&self.keys)
    }
}
