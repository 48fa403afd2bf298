use std::{fmt, sync::Arc, time::Duration};

use aliri_clock::{Clock, System};
use keyward::SharedClock;
use reqwest::{Client, Url};

use crate::{
    config::http_client, dto::ClientCredentialsGrant, request::request_token, AssertionSigner,
    ClientCredentialsConfig, TokenRequestError, TokenResponse, CLIENT_ASSERTION_TYPE,
};

/// Client for the client credentials flow, authenticated by a private key JWT
///
/// A client without a configured private key can still be constructed; each
/// login attempt then fails with [`TokenRequestError::MissingSigningKey`].
#[derive(Clone)]
pub struct ClientCredentialsClient {
    client: Client,
    token_url: Url,
    scopes: String,
    timeout: Duration,
    signer: Option<Arc<AssertionSigner>>,
    clock: SharedClock,
}

impl fmt::Debug for ClientCredentialsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsClient")
            .field("token_url", &self.token_url.as_str())
            .field("scopes", &self.scopes)
            .field("timeout", &self.timeout)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsClient {
    /// Constructs a client from its configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the token endpoint cannot be resolved, the HTTP
    /// client cannot be constructed, or a configured private key cannot be
    /// parsed.
    pub fn new(config: &ClientCredentialsConfig) -> Result<Self, TokenRequestError> {
        let signer = match AssertionSigner::from_config(config) {
            Ok(signer) => Some(Arc::new(signer)),
            Err(TokenRequestError::MissingSigningKey) => {
                tracing::warn!("no private key configured; client credentials logins will fail");
                None
            }
            Err(err) => return Err(err),
        };

        Ok(Self {
            client: http_client(config.http_timeout())?,
            token_url: config.token_url()?,
            scopes: config.scopes.clone(),
            timeout: config.http_timeout(),
            signer,
            clock: Arc::new(System),
        })
    }

    /// Uses a specific HTTP client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Uses the given clock to stamp assertions
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Obtains tokens for this service
    ///
    /// A fresh client assertion is minted for every call.
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError::MissingSigningKey`] if no private key is
    /// configured, [`TokenRequestError::RequestSend`] if the provider cannot be
    /// reached, or [`TokenRequestError::Upstream`] carrying the provider's
    /// status and body if it rejects the request.
    pub async fn login(&self) -> Result<TokenResponse, TokenRequestError> {
        let signer = self
            .signer
            .as_deref()
            .ok_or(TokenRequestError::MissingSigningKey)?;

        let assertion = signer.sign(self.clock.now())?;

        let form = ClientCredentialsGrant {
            grant_type: "client_credentials",
            scope: &self.scopes,
            client_assertion_type: CLIENT_ASSERTION_TYPE,
            client_assertion: assertion.as_str(),
        };

        request_token(
            &self.client,
            self.token_url.clone(),
            form.grant_type,
            &form,
            self.timeout,
        )
        .await
    }
}
