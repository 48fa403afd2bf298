//! DTOs exchanged with the identity provider's token endpoint

use serde::{Deserialize, Serialize};

use crate::{
    AccessToken, AuthorizationCode, AuthorizationCodeRef, AuthzState, ClientIdRef,
    ClientSecretRef, IdToken, RefreshToken,
};

/// Tokens issued by the identity provider
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    /// The access token
    pub access_token: AccessToken,

    /// The kind of token issued, usually `Bearer`
    pub token_type: String,

    /// A refresh token, if one was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,

    /// Lifetime of the access token, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// An OpenID Connect ID token, if one was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,
}

/// Query parameters the provider attaches when redirecting back after
/// authorization
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackParams {
    /// The authorization code
    #[serde(default)]
    pub code: Option<AuthorizationCode>,

    /// The state issued with the authorization request
    #[serde(default)]
    pub state: Option<AuthzState>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthorizationCodeGrant<'a> {
    pub grant_type: &'static str,
    pub code: &'a AuthorizationCodeRef,
    pub redirect_uri: &'a str,
    pub client_id: &'a ClientIdRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<&'a ClientSecretRef>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ClientCredentialsGrant<'a> {
    pub grant_type: &'static str,
    pub scope: &'a str,
    pub client_assertion_type: &'static str,
    pub client_assertion: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_token_fields_may_be_absent() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at","token_type":"Bearer"}"#).unwrap();

        assert_eq!(resp.access_token.as_str(), "at");
        assert_eq!(resp.token_type, "Bearer");
        assert_eq!(resp.refresh_token, None);
        assert_eq!(resp.expires_in, None);
    }

    #[test]
    fn secrets_are_redacted_when_debugged() {
        let resp = TokenResponse {
            access_token: AccessToken::from_static("eyJhbGciOiJSUzI1NiJ9.secret"),
            token_type: String::from("Bearer"),
            refresh_token: Some(RefreshToken::from_static("rt-secret")),
            expires_in: Some(3600),
            id_token: None,
        };

        let debugged = format!("{resp:?}");

        assert!(!debugged.contains("secret"));
    }
}
