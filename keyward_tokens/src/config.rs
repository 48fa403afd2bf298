use std::time::Duration;

use aliri::{jwk, jwt};
use keyward::{ClientId, ClientSecret, ConfigError, PrivateKeyPem};
use reqwest::Url;
use serde::Deserialize;

const DEFAULT_ISSUER: &str = "http://localhost:8080";
const DEFAULT_SCOPES: &str = "openid profile email";
const DEFAULT_TOKEN_ENDPOINT: &str = "/oauth/v2/token";

/// Settings for the browser-based authorization code flow
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AuthorizationCodeConfig {
    /// Issuer URL, used as the base for relative endpoints
    pub issuer: jwt::Issuer,

    /// Client ID of the web application
    pub client_id: ClientId,

    /// Client secret of the web application
    pub client_secret: Option<ClientSecret>,

    /// Where the provider sends the browser back to
    pub redirect_uri: String,

    /// Authorization endpoint, absolute or relative to the issuer
    pub authorization_endpoint: String,

    /// Token endpoint, absolute or relative to the issuer
    pub token_endpoint: String,

    /// Space-separated scopes to request
    pub scopes: String,

    /// Upper bound for the code exchange, in seconds
    pub http_timeout_secs: u64,
}

impl Default for AuthorizationCodeConfig {
    fn default() -> Self {
        Self {
            issuer: jwt::Issuer::from_static(DEFAULT_ISSUER),
            client_id: ClientId::from_static("client-id-fe"),
            client_secret: None,
            redirect_uri: String::from("http://localhost:8000/callback"),
            authorization_endpoint: String::from("/oauth/v2/auth"),
            token_endpoint: String::from(DEFAULT_TOKEN_ENDPOINT),
            scopes: String::from(DEFAULT_SCOPES),
            http_timeout_secs: 10,
        }
    }
}

impl AuthorizationCodeConfig {
    /// The resolved authorization endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be resolved to a URL.
    pub fn authorization_url(&self) -> Result<Url, ConfigError> {
        resolve_endpoint(
            &self.issuer,
            &self.authorization_endpoint,
            "authorization_endpoint",
        )
    }

    /// The resolved token endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be resolved to a URL.
    pub fn token_url(&self) -> Result<Url, ConfigError> {
        resolve_endpoint(&self.issuer, &self.token_endpoint, "token_endpoint")
    }

    /// Upper bound for the code exchange
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Settings for the client credentials flow with a private key JWT assertion
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientCredentialsConfig {
    /// Issuer URL, used as the assertion audience and as the base for
    /// relative endpoints
    pub issuer: jwt::Issuer,

    /// Client ID of the service, used as assertion issuer and subject
    pub client_id: ClientId,

    /// PEM-encoded RSA private key that signs the assertion
    ///
    /// Literal `\n` sequences are accepted in place of line breaks.
    pub private_key: Option<PrivateKeyPem>,

    /// Key ID announced in the assertion header
    pub key_id: Option<jwk::KeyId>,

    /// Space-separated scopes to request
    pub scopes: String,

    /// Token endpoint, absolute or relative to the issuer
    pub token_endpoint: String,

    /// Upper bound for the token request, in seconds
    pub http_timeout_secs: u64,

    /// How long each assertion stays valid, in seconds
    pub assertion_lifetime_secs: u64,
}

impl Default for ClientCredentialsConfig {
    fn default() -> Self {
        Self {
            issuer: jwt::Issuer::from_static(DEFAULT_ISSUER),
            client_id: ClientId::from_static("client-id"),
            private_key: None,
            key_id: None,
            scopes: String::from(DEFAULT_SCOPES),
            token_endpoint: String::from(DEFAULT_TOKEN_ENDPOINT),
            http_timeout_secs: 10,
            assertion_lifetime_secs: 3600,
        }
    }
}

impl ClientCredentialsConfig {
    /// The resolved token endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be resolved to a URL.
    pub fn token_url(&self) -> Result<Url, ConfigError> {
        resolve_endpoint(&self.issuer, &self.token_endpoint, "token_endpoint")
    }

    /// Upper bound for the token request
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// How long each assertion stays valid
    pub fn assertion_lifetime(&self) -> Duration {
        Duration::from_secs(self.assertion_lifetime_secs)
    }
}

fn resolve_endpoint(
    issuer: &jwt::IssuerRef,
    endpoint: &str,
    field: &'static str,
) -> Result<Url, ConfigError> {
    if let Ok(url) = Url::parse(endpoint) {
        return Ok(url);
    }

    let joined = format!(
        "{}/{}",
        issuer.as_str().trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|source| ConfigError::InvalidUrl { field, source })
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .user_agent(concat!("keyward_tokens/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(ConfigError::HttpClient)
}
