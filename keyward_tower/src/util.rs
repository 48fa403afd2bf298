//! Utilities for generating HTTP responses on authentication failures

use http::{header, HeaderValue, Response, StatusCode};
use keyward::RolePolicy;

/// Build a `401 Unauthorized` response with the appropriate `www-authenticate`
/// header
///
/// The description provided will be automatically escaped to make sure it
/// is header-friendly.
///
/// The prepared response will have the form:
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// www-authenticate: Bearer error="{error}" error_description="{description}"
/// ```
///
/// `error_description` is omitted if `description` is empty.
pub fn unauthorized<Body: Default>(error: &str, description: &str) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut()
        .insert(header::WWW_AUTHENTICATE, challenge(error, description, None));
    resp
}

/// Build a `401 Unauthorized` response for a caller whose roles do not
/// satisfy a route
///
/// When a `policy` is given, a `www-authenticate` header is added for each
/// role group the policy accepts:
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// www-authenticate: Bearer error="insufficient_scope" error_description="{description}" scope="ops audit"
/// www-authenticate: Bearer error="insufficient_scope" error_description="{description}" scope="admin"
/// ```
///
/// Otherwise, or if the policy accepts nothing, a single header without
/// `scope` is added. `error_description` is omitted if `description` is empty.
pub fn insufficient_scope<Body: Default>(
    description: &str,
    policy: Option<&RolePolicy>,
) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::UNAUTHORIZED;

    match policy.and_then(RolePolicy::required) {
        Some(groups) if !groups.is_empty() => {
            for group in groups {
                resp.headers_mut().append(
                    header::WWW_AUTHENTICATE,
                    challenge("insufficient_scope", description, Some(group.as_str())),
                );
            }
        }
        _ => {
            resp.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                challenge("insufficient_scope", description, None),
            );
        }
    }

    resp
}

/// Build a `500 Internal Server Error` response
///
/// Used when the identity provider's keys could not be obtained, so that the
/// caller is not told their token was at fault.
pub fn server_error<Body: Default>() -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}

fn challenge(error: &str, description: &str, scope: Option<&str>) -> HeaderValue {
    let mut value = format!(r#"Bearer error="{}""#, error.escape_default());
    if !description.is_empty() {
        value.push_str(&format!(
            r#" error_description="{}""#,
            description.escape_default()
        ));
    }
    if let Some(scope) = scope {
        value.push_str(&format!(r#" scope="{}""#, scope.escape_default()));
    }

    // Escaping leaves only printable ASCII
    HeaderValue::try_from(value).unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
}
