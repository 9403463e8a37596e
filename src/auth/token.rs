//! Authorization-code exchange against the platform's token endpoint

use crate::error::{AuthError, Result};
use crate::utils::{mask_secret, truncate_for_display};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use std::fmt;

/// Longest slice of an upstream body quoted in error messages
pub(crate) const MAX_BODY_IN_ERROR: usize = 200;

/// Successful response from the token endpoint
///
/// Only `access_token` is used by the login flow. The remaining fields are
/// accepted so that a full response parses, but no refresh is performed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccessTokenResponse {
    /// Opaque bearer token
    #[serde(default)]
    pub access_token: String,
    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: Option<String>,
    /// Refresh token, if issued
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body (`{"error": ..., "error_description": ...}`)
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
    #[serde(default)]
    pub(crate) error_description: Option<String>,
}

impl ErrorResponse {
    /// Human-readable message from an error body, falling back to the raw text
    pub(crate) fn describe(body: &str) -> String {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(error) => match error.error_description {
                Some(description) => format!("{}: {description}", error.error),
                None => error.error,
            },
            Err(_) => truncate_for_display(body, MAX_BODY_IN_ERROR),
        }
    }
}

/// Client for `POST {oauth_base}/token`
#[derive(Clone)]
pub struct TokenExchangeClient {
    http_client: reqwest::Client,
    oauth_base: String,
    client_id: String,
    client_secret: String,
}

impl fmt::Debug for TokenExchangeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchangeClient")
            .field("oauth_base", &self.oauth_base)
            .field("client_id", &self.client_id)
            .field("client_secret", &mask_secret(&self.client_secret))
            .finish_non_exhaustive()
    }
}

impl TokenExchangeClient {
    /// Create a token client for one integration key
    pub fn new(
        http_client: reqwest::Client,
        oauth_base: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            oauth_base: oauth_base.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Token endpoint URL
    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/token", self.oauth_base)
    }

    /// `Authorization` header value: `Basic base64(client_id:client_secret)`
    #[must_use]
    pub fn basic_authorization(&self) -> String {
        let pair = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", STANDARD.encode(pair))
    }

    /// Exchange an authorization code for an access token
    ///
    /// # Errors
    ///
    /// Returns `AuthError::AuthExchange` if the request fails, the endpoint
    /// answers with an error status, the body does not parse, or the
    /// returned access token is empty.
    pub async fn exchange(&self, code: &str) -> Result<AccessTokenResponse> {
        tracing::debug!(code = %mask_secret(code), "Exchanging authorization code");

        let response = self
            .http_client
            .post(self.token_url())
            .header(reqwest::header::AUTHORIZATION, self.basic_authorization())
            .form(&[("grant_type", "authorization_code"), ("code", code)])
            .send()
            .await
            .map_err(|e| AuthError::auth_exchange(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::auth_exchange(format!("token response read failed: {e}")))?;

        if !status.is_success() {
            return Err(AuthError::auth_exchange(format!(
                "token endpoint returned {status}: {}",
                ErrorResponse::describe(&body)
            )));
        }

        let token: AccessTokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::auth_exchange(format!(
                "failed to parse token response: {e} - Response: {}",
                truncate_for_display(&body, MAX_BODY_IN_ERROR)
            ))
        })?;

        if token.access_token.is_empty() {
            return Err(AuthError::auth_exchange("token response has an empty access_token"));
        }

        tracing::debug!(
            token_type = token.token_type.as_deref().unwrap_or("unknown"),
            expires_in = token.expires_in,
            "Access token received"
        );
        Ok(token)
    }
}
