use std::net::SocketAddr;

use aliri::jwt;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use keyward::{Authenticator, ClientId, ClientSecret, IdpConfig};
use keyward_axum::{CurrentUser, TokenFailure};
use keyward_tokens::{
    AuthorizationCodeClient, AuthorizationCodeConfig, CallbackParams, ClientCredentialsClient,
    ClientCredentialsConfig, PrivateKeyPem, StateStore, TokenResponse,
};
use keyward_tower::Authorizer;
use serde_json::{json, Value};

mod role {
    keyward_axum::role_guards! {
        pub role Admin = "admin";
    }
}

#[derive(Debug, Parser)]
struct Opts {
    /// The address to listen on
    #[arg(long, env, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// The identity provider's issuer URL
    #[arg(long, env, default_value = "http://localhost:8080")]
    issuer: String,

    /// The identity provider's JSON Web Key Set URL
    #[arg(long, env, default_value = "http://localhost:8080/oauth/v2/keys")]
    jwks_url: String,

    /// The audience expected in access tokens
    #[arg(long, env, default_value = "client-id")]
    audience: String,

    /// The API's client ID, used for introspection
    #[arg(long, env, default_value = "client-id")]
    client_id: String,

    /// The API's client secret, used for introspection
    #[arg(long, env, hide_env_values = true)]
    client_secret: Option<String>,

    /// Ask the identity provider about every token instead of verifying
    /// signatures locally
    #[arg(long, env)]
    use_introspection: bool,

    /// The web application's client ID
    #[arg(long, env, default_value = "client-id-fe")]
    frontend_client_id: String,

    /// The web application's client secret
    #[arg(long, env, hide_env_values = true)]
    frontend_client_secret: Option<String>,

    /// Where the identity provider redirects the browser after login
    #[arg(long, env, default_value = "http://localhost:8000/auth/callback")]
    redirect_uri: String,

    /// The service account's client ID for the client credentials flow
    #[arg(long, env, default_value = "client-id")]
    service_client_id: String,

    /// The service account's PEM-encoded private key
    #[arg(long, env, hide_env_values = true)]
    service_private_key: Option<String>,

    /// The key ID registered for the service account's private key
    #[arg(long, env)]
    service_key_id: Option<String>,
}

#[derive(Clone, Debug)]
struct AppState {
    code_client: AuthorizationCodeClient,
    service_client: ClientCredentialsClient,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let idp = IdpConfig {
        issuer: jwt::Issuer::new(opts.issuer.clone()),
        jwks_url: opts.jwks_url,
        audience: jwt::Audience::new(opts.audience),
        client_id: ClientId::new(opts.client_id),
        client_secret: opts.client_secret.map(ClientSecret::new),
        use_introspection: opts.use_introspection,
        ..IdpConfig::default()
    };

    let code_client = AuthorizationCodeClient::new(AuthorizationCodeConfig {
        issuer: jwt::Issuer::new(opts.issuer.clone()),
        client_id: ClientId::new(opts.frontend_client_id),
        client_secret: opts.frontend_client_secret.map(ClientSecret::new),
        redirect_uri: opts.redirect_uri,
        ..AuthorizationCodeConfig::default()
    })?
    .with_state_store(StateStore::new());

    let service_client = ClientCredentialsClient::new(&ClientCredentialsConfig {
        issuer: jwt::Issuer::new(opts.issuer),
        client_id: ClientId::new(opts.service_client_id),
        private_key: opts.service_private_key.map(PrivateKeyPem::new),
        key_id: opts.service_key_id.map(aliri::jwk::KeyId::new),
        ..ClientCredentialsConfig::default()
    })?;

    let authenticator = Authenticator::from_config(&idp)?;
    let refresh = authenticator.spawn_key_refresh(idp.jwks_refresh_interval());

    let authorizer = Authorizer::new(authenticator)
        .with_verbose_error_handler::<axum::body::Body>()
        .excluding_path_prefix("/auth/");

    let router = Router::new()
        .route("/auth/authorization-url", post(authorization_url))
        .route("/auth/callback", get(callback))
        .route("/auth/login", post(login))
        .route("/me", get(me))
        .route("/admin", get(admin))
        .with_state(AppState {
            code_client,
            service_client,
        })
        .layer(authorizer.authenticate_layer());

    let listener = tokio::net::TcpListener::bind(opts.listen).await?;
    tracing::info!(address = %opts.listen, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    if let Some(refresh) = refresh {
        refresh.shutdown().await;
    }

    Ok(())
}

async fn authorization_url(State(state): State<AppState>) -> Json<Value> {
    let (url, _) = state.code_client.authorization_request();
    Json(json!({ "authorization_url": url.as_str() }))
}

async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Value>, TokenFailure> {
    let tokens = state.code_client.handle_callback(&params).await?;
    Ok(Json(json!({ "token": tokens })))
}

async fn login(State(state): State<AppState>) -> Result<Json<TokenResponse>, TokenFailure> {
    Ok(Json(state.service_client.login().await?))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<keyward::Identity> {
    Json(user)
}

async fn admin(role::Admin(user): role::Admin) -> Json<Value> {
    Json(json!({
        "message": "Welcome, administrator",
        "sub": user.subject,
    }))
}
