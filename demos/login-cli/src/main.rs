//! Command line sign-in for the batch downloader
//!
//! Reads the downloader's `config.json`, signs in through the browser when
//! the cached credential is missing or stale, and prints who is signed in.
//!
//! Run with:
//!   cargo run -p dsbd-login -- --config config.json login
//!   cargo run -p dsbd-login -- status
//!   cargo run -p dsbd-login -- logout
//!
//! Set `RUST_LOG=dsbd_auth=debug` to follow each login step.

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use dsbd_auth::utils::mask_secret;
use dsbd_auth::{AuthConfig, Credential, OAuthClient};
use std::path::PathBuf;
use std::process::ExitCode;

/// Browser sign-in for the DocuSign batch downloader
#[derive(Parser, Debug)]
#[command(name = "dsbd-login", version)]
#[command(about = "Sign in to the e-signature platform and cache the credential")]
struct Args {
    /// Path to the downloader configuration file
    #[arg(long, short = 'c', default_value = "config.json")]
    config: PathBuf,

    /// Sign in through the browser even if a fresh credential is cached
    #[arg(long)]
    force: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Use the cached credential or sign in (default)
    Login,
    /// Show the cached credential without signing in
    Status,
    /// Delete the cached credential
    Logout,
}

/// Print the signed-in user and account
fn display_credential(credential: &Credential) {
    println!();
    println!("  {} {}", style("User:").cyan().bold(), credential.user_name);
    println!("  {} {}", style("Email:").cyan().bold(), credential.user_email);
    println!(
        "  {} {} ({})",
        style("Account:").cyan().bold(),
        credential.account_name,
        credential.account_id
    );
    println!("  {} {}", style("Base URI:").cyan().bold(), credential.base_uri);
    println!(
        "  {} {}",
        style("Token:").cyan().bold(),
        style(mask_secret(&credential.access_token)).dim()
    );
    println!();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AuthConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    tracing::debug!(?config, "Configuration");
    let client = OAuthClient::new(config);

    match args.command.unwrap_or(Command::Login) {
        Command::Login => {
            let credential = if args.force {
                client.login().await?
            } else {
                client.authenticate().await?
            };
            println!("{}", style("Signed in").green().bold());
            display_credential(&credential);
        }
        Command::Status => match client.cached_credential() {
            Some(credential) => {
                println!(
                    "{} {}",
                    style("Cached credential:").green().bold(),
                    client.cache().path().display()
                );
                display_credential(&credential);
            }
            None => {
                println!(
                    "{} {}",
                    style("No fresh credential at").yellow(),
                    client.cache().path().display()
                );
            }
        },
        Command::Logout => {
            client.logout()?;
            println!("{}", style("Signed out").green().bold());
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Default: info for the library, warn for deps
    // Override with RUST_LOG env var for more detail
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dsbd_auth=info,dsbd_login=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Dropping the login future on Ctrl-C releases the redirect listener and
    // kills the browser; it runs in its own process group and misses the signal
    tokio::select! {
        result = run(args) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{} {e:#}", style("Error:").red().bold());
                ExitCode::FAILURE
            }
        },
        () = interrupted() => {
            eprintln!("{}", style("Interrupted").yellow());
            ExitCode::from(130)
        }
    }
}
