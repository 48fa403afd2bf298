use std::{fmt, sync::Arc};

use http::Method;
use keyward::{Authenticator, RolePolicy};
use tower_http::{
    auth::AsyncRequireAuthorizationLayer, validate_request::ValidateRequestHeaderLayer,
};

use crate::{
    authenticate::Exclusions, AuthenticateRequest, RequireRoles, TerseErrorHandler,
    VerboseErrorHandler,
};

/// Builder for generating layers that authenticate bearer tokens and
/// authorize access based on the caller's roles
///
/// `OPTIONS` and `HEAD` requests are passed through without authentication
/// by default.
pub struct Authorizer<OnError> {
    authenticator: Authenticator,
    exclusions: Exclusions,
    on_error: OnError,
}

impl<OnError> Clone for Authorizer<OnError>
where
    OnError: Clone,
{
    fn clone(&self) -> Self {
        Self {
            authenticator: self.authenticator.clone(),
            exclusions: self.exclusions.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<OnError> fmt::Debug for Authorizer<OnError>
where
    OnError: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Authorizer")
            .field("authenticator", &self.authenticator)
            .field("exclusions", &self.exclusions)
            .field("on_error", &self.on_error)
            .finish()
    }
}

impl Authorizer<()> {
    /// Constructs a new authorizer around an authenticator
    #[inline]
    pub fn new(authenticator: Authenticator) -> Self {
        Self {
            authenticator,
            exclusions: Exclusions {
                methods: vec![Method::OPTIONS, Method::HEAD],
                path_prefixes: Vec::new(),
            },
            on_error: (),
        }
    }

    /// Attaches a custom error handler to generate responses
    /// in the event of an authentication or authorization failure
    #[inline]
    pub fn with_error_handler<OnError>(self, on_error: OnError) -> Authorizer<OnError> {
        Authorizer {
            authenticator: self.authenticator,
            exclusions: self.exclusions,
            on_error,
        }
    }

    /// Attaches the terse error handler: [`TerseErrorHandler`]
    ///
    /// This error handler generates responses containing the relevant
    /// status code with an empty body, and a challenge naming only the
    /// error code
    #[inline]
    pub fn with_terse_error_handler<ResBody: Default>(
        self,
    ) -> Authorizer<TerseErrorHandler<ResBody>> {
        self.with_error_handler(TerseErrorHandler::new())
    }

    /// Attaches the verbose error handler: [`VerboseErrorHandler`]
    ///
    /// This error handler generates responses containing the relevant
    /// status code with an empty body, and a challenge that also describes
    /// the failure
    #[inline]
    pub fn with_verbose_error_handler<ResBody: Default>(
        self,
    ) -> Authorizer<VerboseErrorHandler<ResBody>> {
        self.with_error_handler(VerboseErrorHandler::new())
    }
}

impl<OnError> Authorizer<OnError> {
    /// Passes requests for `prefix` and the paths beneath it through without
    /// authentication
    ///
    /// Prefixes match whole path segments: excluding `/auth` covers `/auth`
    /// and `/auth/login` but not `/authz`.
    #[inline]
    pub fn excluding_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.exclusions.path_prefixes.push(prefix.into());
        self
    }

    /// Passes requests with the given method through without authentication
    #[inline]
    pub fn excluding_method(mut self, method: Method) -> Self {
        if !self.exclusions.methods.contains(&method) {
            self.exclusions.methods.push(method);
        }
        self
    }

    /// Authenticates every request, including `OPTIONS` and `HEAD`, unless
    /// excluded by path
    #[inline]
    pub fn including_all_methods(mut self) -> Self {
        self.exclusions.methods.clear();
        self
    }

    /// The authenticator used by generated layers
    #[inline]
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }
}

impl<OnError> Authorizer<OnError>
where
    OnError: Clone,
{
    /// Authorizer layer that authenticates the bearer token on each request
    ///
    /// The token is read from the request `Authorization` header and checked
    /// by the [`Authenticator`]. The caller's
    /// [`Identity`][keyward::Identity] is made available through
    /// [`Request::extensions`][http::Request::extensions].
    pub fn authenticate_layer(
        &self,
    ) -> AsyncRequireAuthorizationLayer<AuthenticateRequest<OnError>> {
        AsyncRequireAuthorizationLayer::new(AuthenticateRequest::new(
            self.authenticator.clone(),
            Arc::new(self.exclusions.clone()),
            self.on_error.clone(),
        ))
    }

    /// Authorizer layer that checks the caller's roles against a policy
    ///
    /// The [`Identity`][keyward::Identity] is expected to have already been
    /// added to the [`Request::extensions`][http::Request::extensions] by the
    /// layer from [`authenticate_layer`][Self::authenticate_layer].
    pub fn role_layer(
        &self,
        policy: RolePolicy,
    ) -> ValidateRequestHeaderLayer<RequireRoles<OnError>> {
        ValidateRequestHeaderLayer::custom(RequireRoles::new(policy, self.on_error.clone()))
    }
}
