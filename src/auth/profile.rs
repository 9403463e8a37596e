//! User profile and account lookup via the platform's userinfo endpoint

use super::token::{ErrorResponse, MAX_BODY_IN_ERROR};
use crate::error::{AuthError, Result};
use crate::utils::truncate_for_display;
use serde::Deserialize;

/// One platform account the user can act on
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlatformAccount {
    /// Account identifier (UUID)
    pub account_id: String,
    /// Whether the platform marks this as the user's default account
    pub is_default: bool,
    /// Display name of the account
    pub account_name: String,
    /// Base URL for API calls against this account
    pub base_uri: String,
}

/// Response of `GET {oauth_base}/userinfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    /// Subject (user id)
    pub sub: String,
    /// Full name
    pub name: String,
    /// Given name
    pub given_name: String,
    /// Family name
    pub family_name: String,
    /// Account creation timestamp as sent by the platform
    pub created: String,
    /// Email address
    pub email: String,
    /// Accounts the user belongs to
    pub accounts: Vec<PlatformAccount>,
}

impl UserProfile {
    /// The account the login proceeds with
    ///
    /// Always the first account listed, even when another one is flagged as
    /// default.
    #[must_use]
    pub fn active_account(&self) -> Option<&PlatformAccount> {
        self.accounts.first()
    }
}

/// Client for `GET {oauth_base}/userinfo`
#[derive(Debug, Clone)]
pub struct ProfileClient {
    http_client: reqwest::Client,
    oauth_base: String,
}

impl ProfileClient {
    /// Create a profile client
    pub fn new(http_client: reqwest::Client, oauth_base: impl Into<String>) -> Self {
        Self {
            http_client,
            oauth_base: oauth_base.into(),
        }
    }

    /// Userinfo endpoint URL
    #[must_use]
    pub fn userinfo_url(&self) -> String {
        format!("{}/userinfo", self.oauth_base)
    }

    /// Fetch the signed-in user's profile
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ProfileFetch` if the request fails, the endpoint
    /// answers with an error status, the body does not parse, or the user
    /// has no accounts.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile> {
        let response = self
            .http_client
            .get(self.userinfo_url())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::profile_fetch(format!("userinfo request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::profile_fetch(format!("userinfo response read failed: {e}")))?;

        if !status.is_success() {
            return Err(AuthError::profile_fetch(format!(
                "userinfo endpoint returned {status}: {}",
                ErrorResponse::describe(&body)
            )));
        }

        let profile: UserProfile = serde_json::from_str(&body).map_err(|e| {
            AuthError::profile_fetch(format!(
                "failed to parse userinfo response: {e} - Response: {}",
                truncate_for_display(&body, MAX_BODY_IN_ERROR)
            ))
        })?;

        if profile.accounts.is_empty() {
            return Err(AuthError::profile_fetch("user has no accounts"));
        }

        if profile.accounts.len() > 1 {
            tracing::info!(
                accounts = profile.accounts.len(),
                "User has several accounts, using the first one listed"
            );
        }

        Ok(profile)
    }
}
