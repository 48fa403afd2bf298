use std::fmt;

use aliri::JwtRef;
use async_trait::async_trait;

use crate::{AuthError, Identity, KeySetCache};

/// A strategy for judging whether a bearer token is valid
///
/// Every strategy produces the same normalized [`Identity`], so the
/// [`Authenticator`][crate::Authenticator] does not need to know which one
/// is in use.
#[async_trait]
pub trait TokenVerifier: fmt::Debug + Send + Sync {
    /// Validates the token and maps its claims into an identity
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not acceptable.
    async fn verify(&self, token: &JwtRef) -> Result<Identity, AuthError>;

    /// The key set this strategy depends on, if it verifies signatures
    /// locally
    fn key_set(&self) -> Option<&KeySetCache> {
        None
    }
}
