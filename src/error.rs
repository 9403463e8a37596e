//! Error types for the login subsystem

use thiserror::Error;

/// Every failure the login flow can surface
///
/// All variants are terminal for the current run. A stale or corrupt cache
/// file is not represented here: it is a cache miss, not an error.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Configured browser name is not one of the supported browsers
    #[error("Unsupported browser: {0}")]
    UnsupportedBrowser(String),

    /// Browser executable could not be found or started
    #[error("Could not launch browser: {0}")]
    BrowserLaunch(String),

    /// Loopback listener could not bind the redirect URI
    #[error("Could not listen on redirect URI: {0}")]
    ListenerBindFailure(String),

    /// Redirect arrived without an authorization code
    #[error("Did not receive auth code: {0}")]
    MissingAuthorizationCode(String),

    /// The user did not finish signing in before the login timeout
    #[error(
        "Login timed out after {timeout_secs} seconds\nSuggestion: Finish signing in within the browser window or raise LoginTimeoutSeconds"
    )]
    LoginTimedOut {
        /// Configured timeout in seconds
        timeout_secs: u64,
    },

    /// Code-for-token exchange failed
    #[error("Unable to get access token: {0}")]
    AuthExchange(String),

    /// Profile lookup failed
    #[error("Unable to get user info: {0}")]
    ProfileFetch(String),

    /// Assembled credential failed validation
    #[error("New auth info is invalid: {0}")]
    InvalidCredential(String),

    /// Credential could not be written to the cache file
    #[error("Could not save auth info: {0}")]
    CachePersistFailure(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for login operations
pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// Create an unsupported browser error
    pub fn unsupported_browser(name: impl Into<String>) -> Self {
        Self::UnsupportedBrowser(name.into())
    }

    /// Create a browser launch error
    pub fn browser_launch(msg: impl Into<String>) -> Self {
        Self::BrowserLaunch(msg.into())
    }

    /// Create a listener bind error
    pub fn listener_bind(msg: impl Into<String>) -> Self {
        Self::ListenerBindFailure(msg.into())
    }

    /// Create a missing authorization code error
    pub fn missing_code(msg: impl Into<String>) -> Self {
        Self::MissingAuthorizationCode(msg.into())
    }

    /// Create a login timeout error
    #[must_use]
    pub fn login_timed_out(timeout_secs: u64) -> Self {
        Self::LoginTimedOut { timeout_secs }
    }

    /// Create a token exchange error
    pub fn auth_exchange(msg: impl Into<String>) -> Self {
        Self::AuthExchange(msg.into())
    }

    /// Create a profile fetch error
    pub fn profile_fetch(msg: impl Into<String>) -> Self {
        Self::ProfileFetch(msg.into())
    }

    /// Create an invalid credential error
    pub fn invalid_credential(msg: impl Into<String>) -> Self {
        Self::InvalidCredential(msg.into())
    }

    /// Create a cache persist error
    pub fn cache_persist(msg: impl Into<String>) -> Self {
        Self::CachePersistFailure(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
