use reqwest::{Client, Url};

use crate::{
    config::http_client,
    dto::{AuthorizationCodeGrant, CallbackParams},
    request::request_token,
    AuthorizationCodeConfig, AuthorizationCodeRef, AuthzState, AuthzStateRef, StateStore,
    TokenRequestError, TokenResponse,
};

/// Client for the browser-based authorization code flow
#[derive(Clone, Debug)]
pub struct AuthorizationCodeClient {
    client: Client,
    authorization_url: Url,
    token_url: Url,
    config: AuthorizationCodeConfig,
    states: Option<StateStore>,
}

impl AuthorizationCodeClient {
    /// Constructs a client from its configuration
    ///
    /// # Errors
    ///
    /// Returns an error if an endpoint cannot be resolved or the HTTP client
    /// cannot be constructed.
    pub fn new(config: AuthorizationCodeConfig) -> Result<Self, keyward::ConfigError> {
        Ok(Self {
            client: http_client(config.http_timeout())?,
            authorization_url: config.authorization_url()?,
            token_url: config.token_url()?,
            config,
            states: None,
        })
    }

    /// Uses a specific HTTP client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Tracks issued states so that callbacks must present one of them
    ///
    /// Without a store, the state is returned to the caller for tracking and
    /// is not checked during the exchange.
    pub fn with_state_store(mut self, states: StateStore) -> Self {
        self.states = Some(states);
        self
    }

    /// Builds the URL that starts the flow, together with its anti-forgery
    /// state
    ///
    /// The URL carries `response_type=code`, `client_id`, `redirect_uri`,
    /// `scope` and `state`.
    pub fn authorization_request(&self) -> (Url, AuthzState) {
        let state = AuthzState::generate();

        let mut url = self.authorization_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", self.config.client_id.as_str())
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes)
            .append_pair("state", state.as_str());

        if let Some(states) = &self.states {
            states.record(state.clone());
        }

        tracing::info!(client_id = %self.config.client_id, "issued authorization request");

        (url, state)
    }

    /// Exchanges an authorization code for tokens
    ///
    /// When a state store is attached, `state` must be one it issued and not
    /// yet redeemed. The state is checked before the provider is contacted.
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError::MissingCode`] for an empty code,
    /// [`TokenRequestError::InvalidState`] for a rejected state, or the
    /// provider's rejection.
    #[tracing::instrument(skip_all, fields(client_id = %self.config.client_id))]
    pub async fn exchange_code(
        &self,
        code: &AuthorizationCodeRef,
        state: Option<&AuthzStateRef>,
    ) -> Result<TokenResponse, TokenRequestError> {
        if code.as_str().is_empty() {
            return Err(TokenRequestError::MissingCode);
        }

        if let Some(states) = &self.states {
            let state = state.ok_or_else(|| {
                tracing::debug!("callback carried no state");
                TokenRequestError::InvalidState
            })?;
            states.consume(state)?;
        }

        let form = AuthorizationCodeGrant {
            grant_type: "authorization_code",
            code,
            redirect_uri: &self.config.redirect_uri,
            client_id: &self.config.client_id,
            client_secret: self.config.client_secret.as_deref(),
        };

        request_token(
            &self.client,
            self.token_url.clone(),
            form.grant_type,
            &form,
            self.config.http_timeout(),
        )
        .await
    }

    /// Completes the flow from the provider's redirect parameters
    ///
    /// # Errors
    ///
    /// Returns [`TokenRequestError::MissingCode`] if the redirect carried no
    /// code, otherwise as [`exchange_code`][Self::exchange_code].
    pub async fn handle_callback(
        &self,
        params: &CallbackParams,
    ) -> Result<TokenResponse, TokenRequestError> {
        let code = params
            .code
            .as_deref()
            .ok_or(TokenRequestError::MissingCode)?;

        self.exchange_code(code, params.state.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use aliri::jwt;
    use color_eyre::Result;
    use http::StatusCode;
    use serde_json::json;
    use wiremock::{
        matchers::{any, body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{AuthorizationCode, ClientSecret};

    fn client_for(server: &MockServer) -> Result<AuthorizationCodeClient> {
        let config = AuthorizationCodeConfig {
            issuer: jwt::Issuer::new(server.uri()),
            client_secret: Some(ClientSecret::from_static("secret")),
            ..AuthorizationCodeConfig::default()
        };
        Ok(AuthorizationCodeClient::new(config)?)
    }

    #[test]
    fn authorization_url_carries_flow_parameters() -> Result<()> {
        let client = AuthorizationCodeClient::new(AuthorizationCodeConfig::default())?;

        let (url, state) = client.authorization_request();
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/oauth/v2/auth");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client-id-fe");
        assert_eq!(query["redirect_uri"], "http://localhost:8000/callback");
        assert_eq!(query["scope"], "openid profile email");
        assert_eq!(query["state"], state.as_str());
        Ok(())
    }

    #[test]
    fn each_request_gets_a_new_state() -> Result<()> {
        let client = AuthorizationCodeClient::new(AuthorizationCodeConfig::default())?;

        let (_, first) = client.authorization_request();
        let (_, second) = client.authorization_request();

        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn code_is_exchanged_for_tokens() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/v2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("client_id=client-id-fe"))
            .and(body_string_contains("client_secret=secret"))
            .and(body_string_contains(
                "redirect_uri=http%3A%2F%2Flocalhost%3A8000%2Fcallback",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "token_type": "Bearer",
                "refresh_token": "rt",
                "expires_in": 43199
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server)?
            .exchange_code(&AuthorizationCode::from_static("the-code"), None)
            .await?;

        assert_eq!(tokens.access_token.as_str(), "at");
        assert_eq!(tokens.refresh_token.as_deref().map(|t| t.as_str()), Some("rt"));
        assert_eq!(tokens.expires_in, Some(43199));
        Ok(())
    }

    #[tokio::test]
    async fn provider_rejection_is_passed_through() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)?
            .exchange_code(&AuthorizationCode::from_static("stale"), None)
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body(), r#"{"error":"invalid_grant"}"#);
        Ok(())
    }

    #[tokio::test]
    async fn callback_without_code_never_contacts_provider() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server)?
            .handle_callback(&CallbackParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TokenRequestError::MissingCode));
        assert_eq!(err.body(), "No code provided");
        Ok(())
    }

    #[tokio::test]
    async fn tracked_state_is_redeemed_once() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "at", "token_type": "Bearer" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server)?.with_state_store(StateStore::new());
        let (_, state) = client.authorization_request();
        let params = CallbackParams {
            code: Some(AuthorizationCode::from_static("the-code")),
            state: Some(state),
        };

        client.handle_callback(&params).await?;
        let replay = client.handle_callback(&params).await.unwrap_err();

        assert!(matches!(replay, TokenRequestError::InvalidState));
        Ok(())
    }

    #[tokio::test]
    async fn forged_state_is_rejected_before_contacting_provider() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server)?.with_state_store(StateStore::new());
        let err = client
            .exchange_code(
                &AuthorizationCode::from_static("the-code"),
                Some(AuthzStateRef::from_str("forged")),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TokenRequestError::InvalidState));
        Ok(())
    }
}
