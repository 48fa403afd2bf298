use std::error::Error as StdError;

use http::StatusCode;
use thiserror::Error;

/// An error while attempting to obtain tokens from the identity provider
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenRequestError {
    /// The provider rejected the request
    #[error("identity provider responded with {status}: {body}")]
    Upstream {
        /// Status returned by the provider
        status: StatusCode,
        /// Body returned by the provider, unaltered
        body: String,
    },

    /// Unable to send the request to the provider
    #[error("error connecting to identity provider")]
    RequestSend(#[source] reqwest::Error),

    /// Unable to read the provider's response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),

    /// Unable to deserialize the token body
    #[error("error deserializing token body from identity provider")]
    TokenBody(#[from] serde_json::Error),

    /// No private key has been configured for client assertions
    #[error("private key is not configured")]
    MissingSigningKey,

    /// The configured private key could not be used
    #[error("private key is not a valid RSA private key")]
    InvalidSigningKey(#[source] aliri::error::KeyRejected),

    /// The client assertion could not be signed
    #[error("unable to sign client assertion")]
    Signing(#[source] aliri::error::JwtSigningError),

    /// The callback state was not issued by this service, was already used,
    /// or has expired
    #[error("invalid or expired state")]
    InvalidState,

    /// The callback did not carry an authorization code
    #[error("No code provided")]
    MissingCode,

    /// The client configuration could not be turned into a working client
    #[error(transparent)]
    Config(#[from] keyward::ConfigError),
}

impl TokenRequestError {
    /// The HTTP status that should be relayed to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { status, .. } => *status,
            Self::MissingCode | Self::InvalidState => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The body that should be relayed to the caller
    ///
    /// Upstream bodies are passed through verbatim. Connection failures
    /// describe their cause.
    pub fn body(&self) -> String {
        match self {
            Self::Upstream { body, .. } => body.clone(),
            Self::RequestSend(err) => {
                let mut description = format!("Error connecting to identity provider: {err}");
                let mut source = err.source();
                while let Some(next) = source {
                    description.push_str(": ");
                    description.push_str(&next.to_string());
                    source = next.source();
                }
                description
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_and_body_pass_through() {
        let err = TokenRequestError::Upstream {
            status: StatusCode::FORBIDDEN,
            body: String::from(r#"{"error":"unauthorized_client"}"#),
        };

        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.body(), r#"{"error":"unauthorized_client"}"#);
    }

    #[test]
    fn missing_code_is_a_bad_request() {
        let err = TokenRequestError::MissingCode;

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body(), "No code provided");
    }

    #[test]
    fn missing_key_is_an_internal_error() {
        let err = TokenRequestError::MissingSigningKey;

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body(), "private key is not configured");
    }
}
