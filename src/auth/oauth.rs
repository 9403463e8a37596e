//! Login orchestration: cache check, browser sign-in, token exchange, persistence

use super::browser::{BrowserLauncher, BrowserProcess, build_authorization_url};
use super::credential::{Credential, CredentialCache};
use super::listener::LoopbackListener;
use super::profile::{ProfileClient, UserProfile};
use super::token::{AccessTokenResponse, TokenExchangeClient};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;

/// Steps of a login attempt, as reported in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// Looking for a fresh cached credential
    CheckingCache,
    /// Starting the redirect listener and the browser
    LaunchingBrowser,
    /// Waiting for the user to finish signing in
    AwaitingRedirect,
    /// Trading the authorization code for an access token
    ExchangingToken,
    /// Looking up the user and their accounts
    FetchingProfile,
    /// Checking the assembled credential
    Validating,
    /// Writing the credential to the cache file
    Persisting,
    /// A valid credential is available
    Done,
    /// The attempt ended with an error
    Failed,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginState::CheckingCache => "checking-cache",
            LoginState::LaunchingBrowser => "launching-browser",
            LoginState::AwaitingRedirect => "awaiting-redirect",
            LoginState::ExchangingToken => "exchanging-token",
            LoginState::FetchingProfile => "fetching-profile",
            LoginState::Validating => "validating",
            LoginState::Persisting => "persisting",
            LoginState::Done => "done",
            LoginState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Builder for [`OAuthClient`]
#[derive(Debug)]
pub struct OAuthClientBuilder {
    config: AuthConfig,
    http_client: Option<reqwest::Client>,
    cache: Option<CredentialCache>,
    launcher: Option<BrowserLauncher>,
}

impl OAuthClientBuilder {
    /// Create a builder from a configuration
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            http_client: None,
            cache: None,
            launcher: None,
        }
    }

    /// Set the HTTP client used for the token and userinfo calls
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set custom credential cache (default: from configuration)
    #[must_use]
    pub fn cache(mut self, cache: CredentialCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set custom browser launcher (default: from configuration)
    #[must_use]
    pub fn launcher(mut self, launcher: BrowserLauncher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Build the OAuth client
    #[must_use]
    pub fn build(self) -> OAuthClient {
        let http_client = self.http_client.unwrap_or_default();
        let cache = self
            .cache
            .unwrap_or_else(|| self.config.credential_cache());
        let launcher = self
            .launcher
            .unwrap_or_else(|| self.config.browser_launcher());
        let token_client = TokenExchangeClient::new(
            http_client.clone(),
            self.config.oauth_base.clone(),
            self.config.client_id.clone(),
            self.config.client_secret.clone(),
        );
        let profile_client = ProfileClient::new(http_client, self.config.oauth_base.clone());

        OAuthClient {
            config: self.config,
            cache,
            launcher,
            token_client,
            profile_client,
            login_lock: Mutex::new(()),
        }
    }
}

/// Drives the login and hands out a validated [`Credential`]
///
/// A fresh cached credential is returned without any network traffic.
/// Otherwise the redirect listener is started, the browser is opened on the
/// authorization URL, and once the redirect arrives the code is exchanged,
/// the profile fetched, and the resulting credential validated and cached.
/// Every failure is terminal; nothing is retried and nothing partial is
/// written to the cache.
#[derive(Debug)]
pub struct OAuthClient {
    config: AuthConfig,
    cache: CredentialCache,
    launcher: BrowserLauncher,
    token_client: TokenExchangeClient,
    profile_client: ProfileClient,
    login_lock: Mutex<()>,
}

impl OAuthClient {
    /// Create a client with default collaborators for `config`
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self::builder(config).build()
    }

    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder(config: AuthConfig) -> OAuthClientBuilder {
        OAuthClientBuilder::new(config)
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Get the credential cache
    #[must_use]
    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// URL the browser is sent to
    #[must_use]
    pub fn authorization_url(&self) -> String {
        build_authorization_url(
            &self.config.oauth_base,
            &self.config.client_id,
            &self.config.redirect_uri,
        )
    }

    /// Authenticate - use the cached credential if fresh, else sign in
    ///
    /// Concurrent calls are serialized; a call that waited behind a
    /// successful login picks up the freshly cached credential.
    ///
    /// # Errors
    ///
    /// Returns the first error of the sign-in flow, see [`login`](Self::login).
    pub async fn authenticate(&self) -> Result<Credential> {
        let _guard = self.login_lock.lock().await;

        enter(LoginState::CheckingCache);
        if let Some(credential) = self.cache.try_load() {
            tracing::info!(
                user = %credential.user_name,
                account = %credential.account_name,
                "Using cached credential"
            );
            enter(LoginState::Done);
            return Ok(credential);
        }
        tracing::debug!("No usable cached credential");

        self.run_login().await
    }

    /// Sign in through the browser, ignoring any cached credential
    ///
    /// # Errors
    ///
    /// - `ListenerBindFailure` if the redirect URI cannot be bound
    /// - `BrowserLaunch` if the browser cannot be started
    /// - `LoginTimedOut` if the redirect does not arrive in time
    /// - `MissingAuthorizationCode` if the redirect carries no code
    /// - `AuthExchange` / `ProfileFetch` for failed endpoint calls
    /// - `InvalidCredential` if the platform returned unusable account data
    /// - `CachePersistFailure` if the credential cannot be written
    pub async fn login(&self) -> Result<Credential> {
        let _guard = self.login_lock.lock().await;
        self.run_login().await
    }

    async fn run_login(&self) -> Result<Credential> {
        match self.sign_in().await {
            Ok(credential) => {
                enter(LoginState::Done);
                tracing::info!(
                    user = %credential.user_name,
                    account = %credential.account_name,
                    "Signed in"
                );
                Ok(credential)
            }
            Err(e) => {
                tracing::error!(state = %LoginState::Failed, "Login failed: {e}");
                Err(e)
            }
        }
    }

    async fn sign_in(&self) -> Result<Credential> {
        let code = self.capture_authorization_code().await?;

        enter(LoginState::ExchangingToken);
        let token = self.token_client.exchange(&code).await?;

        enter(LoginState::FetchingProfile);
        let profile = self.profile_client.fetch_profile(&token.access_token).await?;

        enter(LoginState::Validating);
        let credential = assemble_credential(&token, &profile)?;
        credential.validate()?;

        enter(LoginState::Persisting);
        self.cache.save(&credential)?;

        Ok(credential)
    }

    async fn capture_authorization_code(&self) -> Result<String> {
        enter(LoginState::LaunchingBrowser);
        let mut session = AuthorizationSession::open(
            self.authorization_url(),
            &self.config.redirect_uri,
            &self.launcher,
        )
        .await?;

        enter(LoginState::AwaitingRedirect);
        let outcome = session.wait_for_code(self.config.login_timeout()).await;
        session.close().await;

        let code = outcome?;
        if code.is_empty() {
            return Err(AuthError::missing_code(
                "redirect did not carry a code parameter",
            ));
        }
        Ok(code)
    }

    /// Load the cached credential without signing in
    #[must_use]
    pub fn cached_credential(&self) -> Option<Credential> {
        self.cache.try_load()
    }

    /// Log out - delete the cached credential
    ///
    /// # Errors
    ///
    /// Returns an error if the cache file exists but cannot be deleted.
    pub fn logout(&self) -> Result<()> {
        self.cache.clear()?;
        tracing::info!(path = %self.cache.path().display(), "Cached credential removed");
        Ok(())
    }
}

fn enter(state: LoginState) {
    tracing::debug!(%state, "Login state");
}

/// Build a credential from the token and the first listed account
fn assemble_credential(token: &AccessTokenResponse, profile: &UserProfile) -> Result<Credential> {
    let account = profile
        .active_account()
        .ok_or_else(|| AuthError::profile_fetch("user has no accounts"))?;

    Ok(Credential {
        access_token: token.access_token.clone(),
        account_id: account.account_id.clone(),
        base_uri: account.base_uri.clone(),
        user_name: profile.name.clone(),
        account_name: account.account_name.clone(),
        user_email: profile.email.clone(),
    })
}

/// Resources of one in-flight sign-in
///
/// [`close`](Self::close) must run on every path. If the session is dropped
/// instead (the login future was cancelled) the listener and browser are
/// still released through their own `Drop` impls.
#[derive(Debug)]
struct AuthorizationSession {
    authorization_url: String,
    listener: LoopbackListener,
    browser: Option<BrowserProcess>,
}

impl AuthorizationSession {
    /// Start the listener, then the browser
    async fn open(
        authorization_url: String,
        redirect_uri: &str,
        launcher: &BrowserLauncher,
    ) -> Result<Self> {
        let mut listener = LoopbackListener::start(redirect_uri).await?;

        let browser = match launcher.launch(&authorization_url) {
            Ok(browser) => browser,
            Err(e) => {
                listener.stop().await;
                return Err(e);
            }
        };

        tracing::info!(
            url = %authorization_url,
            "Waiting for sign-in to complete in the browser"
        );

        Ok(Self {
            authorization_url,
            listener,
            browser: Some(browser),
        })
    }

    async fn wait_for_code(&mut self, timeout: Option<Duration>) -> Result<String> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.listener.await_code())
                .await
                .map_err(|_| {
                    tracing::warn!(url = %self.authorization_url, "Sign-in was not completed in time");
                    AuthError::login_timed_out(limit.as_secs())
                })?,
            None => self.listener.await_code().await,
        }
    }

    async fn close(&mut self) {
        self.listener.stop().await;
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.kill().await {
                tracing::warn!(browser = %browser.browser(), "Could not close browser: {e}");
            }
        }
    }
}
