use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use http::{Method, Request, Response};
use keyward::Authenticator;
use tower_http::auth::AsyncAuthorizeRequest;

use crate::{handler::respond, OnAuthError};

/// Requests that are passed through without authentication
#[derive(Clone, Debug, Default)]
pub(crate) struct Exclusions {
    pub(crate) methods: Vec<Method>,
    pub(crate) path_prefixes: Vec<String>,
}

impl Exclusions {
    pub(crate) fn matches<B>(&self, request: &Request<B>) -> bool {
        if self.methods.contains(request.method()) {
            return true;
        }

        let path = request.uri().path();
        self.path_prefixes
            .iter()
            .any(|prefix| covers_path(prefix, path))
    }
}

/// Whether `prefix` names `path` or one of its ancestors, segment by segment
fn covers_path(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

/// Authenticates the bearer token presented with each request
///
/// On success, the caller's [`Identity`][keyward::Identity] is attached to the
/// request extensions for handlers and later layers to use. Requests already
/// carrying an identity are not authenticated again.
pub struct AuthenticateRequest<OnError> {
    authenticator: Authenticator,
    exclusions: Arc<Exclusions>,
    on_error: OnError,
}

impl<OnError> AuthenticateRequest<OnError> {
    pub(crate) fn new(
        authenticator: Authenticator,
        exclusions: Arc<Exclusions>,
        on_error: OnError,
    ) -> Self {
        Self {
            authenticator,
            exclusions,
            on_error,
        }
    }
}

impl<OnError> Clone for AuthenticateRequest<OnError>
where
    OnError: Clone,
{
    fn clone(&self) -> Self {
        Self {
            authenticator: self.authenticator.clone(),
            exclusions: Arc::clone(&self.exclusions),
            on_error: self.on_error.clone(),
        }
    }
}

impl<OnError> fmt::Debug for AuthenticateRequest<OnError>
where
    OnError: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthenticateRequest")
            .field("authenticator", &self.authenticator)
            .field("exclusions", &self.exclusions)
            .field("on_error", &self.on_error)
            .finish()
    }
}

impl<OnError, ReqBody> AsyncAuthorizeRequest<ReqBody> for AuthenticateRequest<OnError>
where
    OnError: OnAuthError + Clone + Send + 'static,
    OnError::Body: Default + Send + 'static,
    ReqBody: Send + 'static,
{
    type RequestBody = ReqBody;
    type ResponseBody = OnError::Body;
    type Future = BoxFuture<'static, Result<Request<ReqBody>, Response<OnError::Body>>>;

    fn authorize(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        if self.exclusions.matches(&request) {
            tracing::trace!(
                method = %request.method(),
                path = request.uri().path(),
                "request excluded from authentication"
            );
            return Box::pin(futures::future::ready(Ok(request)));
        }

        let authenticator = self.authenticator.clone();
        let on_error = self.on_error.clone();

        Box::pin(async move {
            match authenticator.authenticate_request(&mut request).await {
                Ok(()) => Ok(request),
                Err(err) => Err(respond(&on_error, &err)),
            }
        })
    }
}
