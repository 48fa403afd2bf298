use aliri::jwt;
use axum::{body::Body, routing::get, Extension, Json, Router};
use color_eyre::Result;
use http::{header, Request, StatusCode};
use keyward::{Authenticator, ClientSecret, IdpConfig};
use keyward_axum::CurrentUser;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

mod role {
    keyward_axum::role_guards! {
        pub role Admin = "admin";
    }
}

async fn provider(answer: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/introspect"))
        .and(body_string_contains("token=opaque-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(answer))
        .mount(&server)
        .await;
    server
}

fn app(server: &MockServer) -> Result<Router> {
    let config = IdpConfig {
        issuer: jwt::Issuer::new(server.uri()),
        client_secret: Some(ClientSecret::from_static("secret")),
        use_introspection: true,
        ..IdpConfig::default()
    };
    let authenticator = Authenticator::from_config(&config)?;

    Ok(Router::new()
        .route(
            "/me",
            get(|CurrentUser(user): CurrentUser| async move { Json(user) }),
        )
        .route(
            "/admin",
            get(|role::Admin(user): role::Admin| async move { user.subject.to_string() }),
        )
        .layer(Extension(authenticator)))
}

fn request(uri: &str, token: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    Ok(builder.body(Body::empty())?)
}

async fn json_body(resp: axum::response::Response) -> Result<Value> {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn current_user_is_the_introspected_identity() -> Result<()> {
    let server = provider(json!({
        "active": true,
        "sub": "user-1",
        "email": "user@example.com",
        "preferred_username": "User One",
        "urn:zitadel:iam:org:project:roles": { "admin": { "123": "org.example" } },
    }))
    .await;

    let resp = app(&server)?
        .oneshot(request("/me", Some("opaque-token"))?)
        .await?;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        json_body(resp).await?,
        json!({
            "sub": "user-1",
            "email": "user@example.com",
            "preferred_username": "User One",
            "roles": ["admin"],
        })
    );
    Ok(())
}

#[tokio::test]
async fn inactive_token_is_refused_with_detail() -> Result<()> {
    let server = provider(json!({ "active": false })).await;

    let resp = app(&server)?
        .oneshot(request("/me", Some("opaque-token"))?)
        .await?;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(resp).await?,
        json!({ "detail": "Invalid token (active: false)" })
    );
    Ok(())
}

#[tokio::test]
async fn missing_header_is_refused() -> Result<()> {
    let server = provider(json!({ "active": true, "sub": "user-1" })).await;

    let resp = app(&server)?.oneshot(request("/me", None)?).await?;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(resp).await?,
        json!({ "detail": "Missing Authorization header" })
    );
    Ok(())
}

#[tokio::test]
async fn role_guard_checks_introspected_roles() -> Result<()> {
    let admin = provider(json!({
        "active": true,
        "sub": "admin-1",
        "urn:zitadel:iam:org:project:roles": { "admin": {} },
    }))
    .await;
    let viewer = provider(json!({
        "active": true,
        "sub": "viewer-1",
        "urn:zitadel:iam:org:project:roles": { "viewer": {} },
    }))
    .await;

    let admitted = app(&admin)?
        .oneshot(request("/admin", Some("opaque-token"))?)
        .await?;
    let refused = app(&viewer)?
        .oneshot(request("/admin", Some("opaque-token"))?)
        .await?;

    assert_eq!(admitted.status(), StatusCode::OK);
    assert_eq!(refused.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        refused.headers()[header::WWW_AUTHENTICATE],
        r#"Bearer error="insufficient_scope" error_description="Token has insufficient scope. Route requires: [\"admin\"]" scope="admin""#
    );
    Ok(())
}
