//! Browser-based OAuth login for the e-signature platform
//!
//! Provides the Authorization Code flow with a loopback redirect listener and
//! an on-disk credential cache.
//!
//! # Overview
//!
//! 1. Reuse `{TopLevelDirectory}/authInfo.json` if it is younger than
//!    `TokenExpiration` hours and still valid
//! 2. Bind the redirect URI on the loopback interface
//! 3. Open the authorization URL in the configured browser
//! 4. Capture the `code` from the first redirect, then close the browser
//! 5. Exchange the code at `{OAuthBase}/token` (HTTP Basic client auth)
//! 6. Look the user up at `{OAuthBase}/userinfo` and pick the first account
//! 7. Validate and cache the credential
//!
//! # Example
//!
//! ```no_run
//! use dsbd_auth::auth::OAuthClient;
//! use dsbd_auth::config::AuthConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuthConfig::load("config.json")?;
//!     let client = OAuthClient::new(config);
//!
//!     let credential = client.authenticate().await?;
//!     println!("Signed in to {} at {}", credential.account_name, credential.base_uri);
//!     Ok(())
//! }
//! ```
//!
//! # Credential cache
//!
//! The cache is written atomically (temp file in the same directory, then
//! rename) and with user-only permissions (600) on Unix. Freshness is judged
//! by the file's modification time; the token's own `expires_in` is not
//! consulted and no refresh is performed.

mod browser;
mod credential;
mod listener;
mod oauth;
mod profile;
mod token;

pub use browser::{Browser, BrowserLauncher, BrowserProcess, build_authorization_url};
pub use credential::{CACHE_FILE_NAME, Credential, CredentialCache};
pub use listener::LoopbackListener;
pub use oauth::{LoginState, OAuthClient, OAuthClientBuilder};
pub use profile::{PlatformAccount, ProfileClient, UserProfile};
pub use token::{AccessTokenResponse, TokenExchangeClient};
