//! # DocuSign Batch Downloader authentication
//!
//! Obtains an access token and account details for the e-signature platform
//! by driving an interactive browser login, and caches the result so later
//! runs of the downloader skip the browser while the cache is fresh.
//!
//! ## Quick Start
//!
//! ```no_run
//! use dsbd_auth::{AuthConfig, OAuthClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuthConfig::load("config.json")?;
//!     let client = OAuthClient::new(config);
//!
//!     let credential = client.authenticate().await?;
//!     println!("{} <{}>", credential.user_name, credential.user_email);
//!     println!("Account: {} ({})", credential.account_name, credential.account_id);
//!     Ok(())
//! }
//! ```
//!
//! The returned [`Credential`] carries everything later API calls need:
//! the bearer token, the account id, and the account's base URI.
//!
//! ## Configuration
//!
//! Settings are read from the downloader's `config.json`; see [`config`] for
//! the keys and their defaults. Configuration can also be built in code:
//!
//! ```no_run
//! # use dsbd_auth::{AuthConfig, Browser};
//! let config = AuthConfig::builder()
//!     .client_id("8f3e0c6a-1111-4222-8333-944455556666")
//!     .client_secret("b1c9d2e3-aaaa-4bbb-8ccc-dddd0000eeee")
//!     .redirect_uri("http://localhost:9000/")
//!     .oauth_base("https://account-d.docusign.com/oauth")
//!     .browser(Browser::Firefox)
//!     .use_private(true)
//!     .build();
//! ```
//!
//! ## Architecture
//!
//! - [`auth`]: login orchestration, browser launch, redirect listener,
//!   token and userinfo clients, credential cache
//! - [`config`]: configuration loading and validation
//! - [`error`]: error types and handling
//! - [`utils`]: string helpers for logs and error messages
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Secrets (client secret, authorization code, access token) are never logged
//! in full. To see logs, attach a tracing subscriber in your application:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("dsbd_auth=debug")
//!     .init();
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, AuthError>`](Result). Every
//! login failure is terminal and leaves the cache untouched:
//!
//! ```no_run
//! # use dsbd_auth::{AuthError, OAuthClient};
//! # async fn example(client: OAuthClient) {
//! match client.authenticate().await {
//!     Ok(credential) => { /* ... */ }
//!     Err(AuthError::LoginTimedOut { timeout_secs }) => {
//!         eprintln!("Sign-in not completed within {timeout_secs}s");
//!     }
//!     Err(e) => {
//!         eprintln!("Error: {}", e);
//!     }
//! }
//! # }
//! ```
//!
//! ## Demo
//!
//! `demos/login-cli` wraps the library in a small command line tool:
//!
//! ```bash
//! cargo run -p dsbd-login -- --config config.json login
//! cargo run -p dsbd-login -- status
//! cargo run -p dsbd-login -- logout
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod utils;

// Re-export commonly used types
pub use auth::{Browser, Credential, CredentialCache, LoginState, OAuthClient, OAuthClientBuilder};
pub use config::AuthConfig;
pub use error::{AuthError, Result};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
