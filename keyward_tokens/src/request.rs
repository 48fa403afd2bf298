use std::time::Duration;

use reqwest::{Client, Url};
use serde::Serialize;

use crate::{TokenRequestError, TokenResponse};

#[tracing::instrument(
    err,
    skip(client, token_url, form, timeout),
    fields(token_url = %token_url, grant_type = grant_type),
)]
pub(crate) async fn request_token<F: Serialize>(
    client: &Client,
    token_url: Url,
    grant_type: &'static str,
    form: &F,
    timeout: Duration,
) -> Result<TokenResponse, TokenRequestError> {
    tracing::trace!("requesting token from identity provider");

    let resp = client
        .post(token_url)
        .form(form)
        .timeout(timeout)
        .send()
        .await
        .map_err(TokenRequestError::RequestSend)?;

    let status = resp.status();
    tracing::debug!(
        http.status_code = status.as_u16(),
        "received token response from identity provider"
    );

    if resp.error_for_status_ref().is_err() {
        let body = resp.text().await.map_err(TokenRequestError::BodyRead)?;
        return Err(TokenRequestError::Upstream { status, body });
    }

    let body = resp.bytes().await.map_err(TokenRequestError::BodyRead)?;
    let tokens: TokenResponse = serde_json::from_slice(&body)?;

    tracing::info!(
        token_type = %tokens.token_type,
        expires_in = tokens.expires_in,
        has_refresh_token = tokens.refresh_token.is_some(),
        has_id_token = tokens.id_token.is_some(),
        "received new tokens"
    );

    Ok(tokens)
}
