use std::time::Duration;

use aliri::jwt;
use serde::Deserialize;
use thiserror::Error;

use crate::{ClientId, ClientSecret};

/// Connection settings for the identity provider that issues the tokens
/// this service accepts
///
/// Every field has a default, so a partial configuration deserializes
/// cleanly. Durations are expressed in whole seconds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IdpConfig {
    /// Issuer URL, expected in the `iss` claim and used as the base for
    /// provider endpoints
    pub issuer: jwt::Issuer,

    /// Location of the provider's JSON Web Key Set
    pub jwks_url: String,

    /// Audience expected in the `aud` claim
    pub audience: jwt::Audience,

    /// Client ID used to authenticate introspection requests
    pub client_id: ClientId,

    /// Client secret used to authenticate introspection requests
    pub client_secret: Option<ClientSecret>,

    /// Ask the provider about every token instead of verifying signatures
    /// locally
    pub use_introspection: bool,

    /// Period of the background key set refresh
    pub jwks_refresh_interval_secs: u64,

    /// Age after which a cached key set is refreshed on demand
    pub jwks_ttl_secs: u64,

    /// Upper bound for any single call to the provider
    pub http_timeout_secs: u64,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            issuer: jwt::Issuer::from_static("http://localhost:8080"),
            jwks_url: String::from("http://localhost:8080/oauth/v2/keys"),
            audience: jwt::Audience::from_static("client-id"),
            client_id: ClientId::from_static("client-id"),
            client_secret: None,
            use_introspection: false,
            jwks_refresh_interval_secs: 6 * 60 * 60,
            jwks_ttl_secs: 60 * 60,
            http_timeout_secs: 10,
        }
    }
}

impl IdpConfig {
    /// Period of the background key set refresh
    pub fn jwks_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_refresh_interval_secs)
    }

    /// Age after which a cached key set is refreshed on demand
    pub fn jwks_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_ttl_secs)
    }

    /// Upper bound for any single call to the provider
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// The parsed key set location
    ///
    /// # Errors
    ///
    /// Returns an error if `jwks_url` is not an absolute URL.
    pub fn jwks_url(&self) -> Result<reqwest::Url, ConfigError> {
        reqwest::Url::parse(&self.jwks_url).map_err(|source| ConfigError::InvalidUrl {
            field: "jwks_url",
            source,
        })
    }

    /// The provider's token introspection endpoint, `{issuer}/oauth/v2/introspect`
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer is not an absolute URL.
    pub fn introspection_url(&self) -> Result<reqwest::Url, ConfigError> {
        let url = format!(
            "{}/oauth/v2/introspect",
            self.issuer.as_str().trim_end_matches('/')
        );
        reqwest::Url::parse(&url).map_err(|source| ConfigError::InvalidUrl {
            field: "issuer",
            source,
        })
    }

    /// An HTTP client suitable for talking to the provider
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying TLS backend cannot be initialized.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .user_agent(concat!("keyward/", env!("CARGO_PKG_VERSION")))
            .timeout(self.http_timeout())
            .build()
            .map_err(ConfigError::HttpClient)
    }
}

/// The configuration could not be turned into working components
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configured URL could not be parsed
    #[error("invalid URL in `{field}`")]
    InvalidUrl {
        /// The offending configuration field
        field: &'static str,
        /// The parse failure
        source: url::ParseError,
    },
    /// The HTTP client could not be constructed
    #[error("unable to construct HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() -> color_eyre::Result<()> {
        let config: IdpConfig = serde_json::from_str(
            r#"{ "issuer": "https://idp.example.com/", "use_introspection": true }"#,
        )?;

        assert_eq!(config.issuer.as_str(), "https://idp.example.com/");
        assert!(config.use_introspection);
        assert_eq!(config.audience.as_str(), "client-id");
        assert_eq!(config.jwks_refresh_interval(), Duration::from_secs(21_600));
        assert_eq!(config.jwks_ttl(), Duration::from_secs(3_600));
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn introspection_url_is_derived_from_issuer() -> color_eyre::Result<()> {
        let config = IdpConfig {
            issuer: jwt::Issuer::from_static("https://idp.example.com/"),
            ..IdpConfig::default()
        };

        assert_eq!(
            config.introspection_url()?.as_str(),
            "https://idp.example.com/oauth/v2/introspect"
        );
        Ok(())
    }

    #[test]
    fn relative_jwks_url_is_rejected() {
        let config = IdpConfig {
            jwks_url: String::from("/oauth/v2/keys"),
            ..IdpConfig::default()
        };

        assert!(matches!(
            config.jwks_url(),
            Err(ConfigError::InvalidUrl { field: "jwks_url", .. })
        ));
    }
}
