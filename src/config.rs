//! Login configuration
//!
//! The batch downloader keeps its settings in a `config.json` with PascalCase
//! keys. Only the keys the login flow needs are read; download settings in
//! the same file are ignored here.
//!
//! ```json
//! {
//!   "ClientId": "8f3e...",
//!   "ClientSecret": "b1c9...",
//!   "RedirectUri": "http://localhost:9000/",
//!   "OAuthBase": "https://account-d.docusign.com/oauth",
//!   "TopLevelDirectory": "C:\\Exports",
//!   "TokenExpiration": 8,
//!   "Browser": "edge",
//!   "UsePrivate": false,
//!   "LoginTimeoutSeconds": 300
//! }
//! ```

use crate::auth::{Browser, BrowserLauncher, CredentialCache};
use crate::error::{AuthError, Result};
use crate::utils::mask_secret;
use reqwest::Url;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Default lifetime of a cached credential, in hours
pub const DEFAULT_TOKEN_EXPIRATION_HOURS: f64 = 8.0;

/// Default time the user has to finish signing in, in seconds
pub const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 300;

fn default_top_level_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_token_expiration() -> f64 {
    DEFAULT_TOKEN_EXPIRATION_HOURS
}

fn default_login_timeout() -> u64 {
    DEFAULT_LOGIN_TIMEOUT_SECS
}

/// Settings for the login flow
#[derive(Clone, Deserialize, TypedBuilder)]
#[serde(rename_all = "PascalCase")]
#[builder(
    builder_method(doc = "Create a new builder for AuthConfig"),
    builder_type(doc = "Builder for AuthConfig", vis = "pub"),
    build_method(doc = "Build the AuthConfig")
)]
pub struct AuthConfig {
    /// Integration key
    #[builder(setter(into))]
    pub client_id: String,

    /// Secret key paired with the integration key
    #[builder(setter(into))]
    pub client_secret: String,

    /// Redirect URI registered for the integration key; the loopback
    /// listener binds here
    #[builder(setter(into))]
    pub redirect_uri: String,

    /// OAuth base URL, e.g. `https://account-d.docusign.com/oauth`
    #[serde(rename = "OAuthBase")]
    #[builder(setter(into))]
    pub oauth_base: String,

    /// Root directory; the credential cache lives at `{root}/authInfo.json`
    #[serde(default = "default_top_level_directory")]
    #[builder(default = default_top_level_directory(), setter(into))]
    pub top_level_directory: PathBuf,

    /// Hours a cached credential stays usable
    #[serde(default = "default_token_expiration", rename = "TokenExpiration")]
    #[builder(default = DEFAULT_TOKEN_EXPIRATION_HOURS)]
    pub token_expiration_hours: f64,

    /// Browser used for sign-in
    #[serde(default)]
    #[builder(default)]
    pub browser: Browser,

    /// Open the sign-in page in a private/incognito window
    #[serde(default)]
    #[builder(default)]
    pub use_private: bool,

    /// Seconds to wait for the user to finish signing in; `0` waits forever
    #[serde(default = "default_login_timeout")]
    #[builder(default = DEFAULT_LOGIN_TIMEOUT_SECS)]
    pub login_timeout_seconds: u64,

    /// Explicit browser executable, for installs that are not on `PATH`
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub browser_path: Option<PathBuf>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &mask_secret(&self.client_secret))
            .field("redirect_uri", &self.redirect_uri)
            .field("oauth_base", &self.oauth_base)
            .field("top_level_directory", &self.top_level_directory)
            .field("token_expiration_hours", &self.token_expiration_hours)
            .field("browser", &self.browser)
            .field("use_private", &self.use_private)
            .field("login_timeout_seconds", &self.login_timeout_seconds)
            .field("browser_path", &self.browser_path)
            .finish()
    }
}

impl AuthConfig {
    /// Load and validate a JSON config file
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the file cannot be read or is
    /// malformed, and `AuthError::UnsupportedBrowser` for an unknown browser.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&content)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse and validate configuration from JSON text
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| AuthError::invalid_config(format!("config is not valid JSON: {e}")))?;

        // Surface an unknown browser as its own error rather than a generic
        // deserialization failure
        if let Some(name) = raw.get("Browser").and_then(serde_json::Value::as_str) {
            name.parse::<Browser>()?;
        }

        let config: Self = serde_json::from_value(raw)
            .map_err(|e| AuthError::invalid_config(e.to_string()))?;
        config.normalized().validated()
    }

    fn normalized(mut self) -> Self {
        self.oauth_base = self.oauth_base.trim().trim_end_matches('/').to_string();
        self.redirect_uri = self.redirect_uri.trim().to_string();
        self.client_id = self.client_id.trim().to_string();
        self
    }

    /// Check required values
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` naming the first bad setting.
    pub fn validated(self) -> Result<Self> {
        for (key, value) in [
            ("ClientId", &self.client_id),
            ("ClientSecret", &self.client_secret),
            ("RedirectUri", &self.redirect_uri),
            ("OAuthBase", &self.oauth_base),
        ] {
            if value.is_empty() {
                return Err(AuthError::invalid_config(format!("{key} is required")));
            }
        }

        Url::parse(&self.oauth_base).map_err(|e| {
            AuthError::invalid_config(format!("OAuthBase '{}' is not a URL: {e}", self.oauth_base))
        })?;
        Url::parse(&self.redirect_uri).map_err(|e| {
            AuthError::invalid_config(format!(
                "RedirectUri '{}' is not a URL: {e}",
                self.redirect_uri
            ))
        })?;

        if !self.token_expiration_hours.is_finite() || self.token_expiration_hours < 0.0 {
            return Err(AuthError::invalid_config(format!(
                "TokenExpiration must be a non-negative number of hours, got {}",
                self.token_expiration_hours
            )));
        }

        Ok(self)
    }

    /// Path of the cached credential file
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.credential_cache().path().to_path_buf()
    }

    /// How long a cached credential stays usable
    ///
    /// Saturates at `Duration::MAX` for values too large to represent.
    #[must_use]
    pub fn token_expiration(&self) -> Duration {
        let hours = self.token_expiration_hours;
        if hours.is_nan() || hours <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(hours * 3600.0).unwrap_or(Duration::MAX)
    }

    /// Bound on the wait for the sign-in redirect, `None` for no bound
    #[must_use]
    pub fn login_timeout(&self) -> Option<Duration> {
        (self.login_timeout_seconds > 0).then(|| Duration::from_secs(self.login_timeout_seconds))
    }

    /// Credential cache described by this configuration
    #[must_use]
    pub fn credential_cache(&self) -> CredentialCache {
        CredentialCache::in_directory(&self.top_level_directory, self.token_expiration())
    }

    /// Browser launcher described by this configuration
    #[must_use]
    pub fn browser_launcher(&self) -> BrowserLauncher {
        let launcher = BrowserLauncher::new(self.browser, self.use_private);
        match self.browser_path {
            Some(ref path) => launcher.with_executable(path),
            None => launcher,
        }
    }
}
