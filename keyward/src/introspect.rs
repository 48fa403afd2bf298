use std::{fmt, sync::Arc, time::Duration};

use aliri::{jwt, JwtRef};
use aliri_clock::{Clock, System, UnixTime};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::{
    AuthError, ClientId, ClientSecret, ConfigError, IdpConfig, Identity, RoleSet, SharedClock,
    TokenVerifier,
};

/// The claim under which the provider lists the project roles granted to the
/// subject
pub const PROJECT_ROLES_CLAIM: &str = "urn:zitadel:iam:org:project:roles";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The provider's answer about a presented token
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct IntrospectionResult {
    /// Whether the token is currently active
    #[serde(default)]
    pub active: bool,

    /// Expiration of the token
    #[serde(default)]
    pub exp: Option<UnixTime>,

    /// Subject of the token
    #[serde(default)]
    pub sub: Option<jwt::Subject>,

    /// Email address of the subject
    #[serde(default)]
    pub email: Option<String>,

    /// Preferred display name of the subject
    #[serde(default)]
    pub preferred_username: Option<String>,

    /// Project roles granted to the subject
    #[serde(default, rename = "urn:zitadel:iam:org:project:roles")]
    pub roles: RoleSet,
}

impl IntrospectionResult {
    /// Judges the answer at `now`, producing the caller's identity
    ///
    /// # Errors
    ///
    /// Returns an error if the token is inactive, expired, or has no subject.
    pub fn into_identity(self, now: UnixTime) -> Result<Identity, AuthError> {
        if !self.active {
            tracing::debug!("introspection reported token as inactive");
            return Err(AuthError::Inactive);
        }

        if let Some(exp) = self.exp {
            if exp < now {
                tracing::debug!(exp = exp.0, now = now.0, "introspected token has expired");
                return Err(AuthError::TokenExpired);
            }
        }

        let subject = self.sub.ok_or_else(AuthError::missing_claim)?;

        Ok(Identity {
            subject,
            email: self.email,
            display_name: self.preferred_username,
            roles: self.roles,
            expires_at: self.exp,
        })
    }
}

#[derive(Serialize)]
struct IntrospectionForm<'a> {
    token: &'a str,
    token_type_hint: &'static str,
    scope: &'static str,
}

/// Asks the provider's introspection endpoint about every presented token
///
/// The request is authenticated with HTTP Basic credentials built from the
/// client ID and secret.
#[derive(Clone)]
pub struct Introspector {
    client: Client,
    url: Url,
    client_id: ClientId,
    client_secret: Option<ClientSecret>,
    clock: SharedClock,
    timeout: Duration,
}

impl fmt::Debug for Introspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Introspector")
            .field("url", &self.url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Introspector {
    /// Constructs an introspector for the given endpoint
    pub fn new(
        client: Client,
        url: Url,
        client_id: ClientId,
        client_secret: Option<ClientSecret>,
    ) -> Self {
        Self {
            client,
            url,
            client_id,
            client_secret,
            clock: Arc::new(System),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Constructs an introspector from the provider configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer is not a valid URL or the HTTP client
    /// cannot be constructed.
    pub fn from_config(config: &IdpConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.http_client()?,
            config.introspection_url()?,
            config.client_id.clone(),
            config.client_secret.clone(),
        )
        .with_timeout(config.http_timeout()))
    }

    /// Uses the given clock to judge expiration
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Bounds each introspection call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The introspection endpoint
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Asks the provider about the token without judging the answer
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached, answers with an
    /// error status, or returns a body that cannot be understood.
    #[tracing::instrument(skip_all, fields(introspection.url = %self.url))]
    pub async fn introspect(&self, token: &JwtRef) -> Result<IntrospectionResult, AuthError> {
        let form = IntrospectionForm {
            token: token.as_str(),
            token_type_hint: "access_token",
            scope: "openid",
        };

        let response = self
            .client
            .post(self.url.clone())
            .basic_auth(
                self.client_id.as_str(),
                self.client_secret.as_ref().map(|s| s.as_str()),
            )
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    "unable to reach introspection endpoint"
                );
                AuthError::Introspection(err)
            })?;

        let response = response.error_for_status().map_err(|err| {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                http.status_code = err.status().map(|s| s.as_u16()),
                "introspection endpoint returned an error"
            );
            AuthError::Introspection(err)
        })?;

        response.json().await.map_err(|err| {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                "unable to decode introspection response"
            );
            AuthError::Introspection(err)
        })
    }
}

#[async_trait]
impl TokenVerifier for Introspector {
    async fn verify(&self, token: &JwtRef) -> Result<Identity, AuthError> {
        let result = self.introspect(token).await?;
        result.into_identity(self.clock.now())
    }
}
