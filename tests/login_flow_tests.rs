//! Integration tests for the full login flow
//!
//! The token and userinfo endpoints are served by a local mock server. The
//! browser is a shell script that just sleeps; each test plays the user by
//! requesting the redirect URI itself.

use dsbd_auth::auth::{Credential, OAuthClient};
use dsbd_auth::{AuthConfig, AuthError, Browser};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACCOUNT_ID: &str = "18b4799a-b53a-4475-ae9b-bbd6fc6e3e4a";
const BASIC_AUTH: &str = "Basic aW50ZWdyYXRpb24ta2V5OnNlY3JldC1rZXk=";

// ============================================================================
// Helpers
// ============================================================================

fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// A port that was free a moment ago
async fn free_port() -> u16 {
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    probe.local_addr().unwrap().port()
}

#[cfg(unix)]
fn fake_browser(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-browser");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn config(root: &Path, oauth_base: &str, redirect_uri: &str, browser_path: &Path) -> AuthConfig {
    AuthConfig::builder()
        .client_id("integration-key")
        .client_secret("secret-key")
        .redirect_uri(redirect_uri)
        .oauth_base(oauth_base)
        .top_level_directory(root)
        .browser(Browser::Chrome)
        .login_timeout_seconds(30)
        .browser_path(browser_path)
        .build()
}

fn client(config: AuthConfig) -> OAuthClient {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dsbd_auth=debug")
        .with_test_writer()
        .try_init();
    OAuthClient::builder(config).http_client(http_client()).build()
}

/// Request the redirect URI the way the browser would after sign-in
async fn complete_sign_in(redirect_uri: String, query: &'static str) {
    let client = http_client();
    let url = format!("{redirect_uri}?{query}");
    for _ in 0..100 {
        if let Ok(response) = client.get(&url).send().await {
            if response.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("redirect listener never answered at {url}");
}

async fn mount_token(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("authorization", BASIC_AUTH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=XYZ"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_userinfo(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer eyJ0eXAi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

fn userinfo_with_accounts() -> serde_json::Value {
    json!({
        "sub": "4799e5e9-1559-4915-9862-cf4713bbcacc",
        "name": "Pat Signer",
        "email": "pat@acme.example",
        "accounts": [
            {
                "account_id": ACCOUNT_ID,
                "is_default": false,
                "account_name": "Acme Sandbox",
                "base_uri": "https://demo.docusign.net"
            },
            {
                "account_id": "2a6f0f1e-7d1c-4b9e-8f8a-3c2d1e0f9a8b",
                "is_default": true,
                "account_name": "Acme Legal",
                "base_uri": "https://na3.docusign.net"
            }
        ]
    })
}

fn cached_credential() -> Credential {
    Credential {
        access_token: "cached-token".to_string(),
        account_id: ACCOUNT_ID.to_string(),
        base_uri: "https://demo.docusign.net".to_string(),
        user_name: "Pat Signer".to_string(),
        account_name: "Acme Sandbox".to_string(),
        user_email: "pat@acme.example".to_string(),
    }
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn test_fresh_cache_skips_network_and_browser() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let missing_browser = temp_dir.path().join("no-such-browser");
    let config = config(
        temp_dir.path(),
        &server.uri(),
        "http://127.0.0.1:0/",
        &missing_browser,
    );
    let client = client(config);
    client.cache().save(&cached_credential()).unwrap();

    let credential = client.authenticate().await.unwrap();
    assert_eq!(credential, cached_credential());
}

// ============================================================================
// Full browser login
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_login_persists_first_account() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_token(&server, json!({"access_token": "eyJ0eXAi", "expires_in": 28800})).await;
    mount_userinfo(&server, userinfo_with_accounts()).await;

    let redirect_uri = format!("http://127.0.0.1:{}/", free_port().await);
    let browser = fake_browser(temp_dir.path());
    let client = client(config(temp_dir.path(), &server.uri(), &redirect_uri, &browser));

    let user = tokio::spawn(complete_sign_in(redirect_uri.clone(), "code=XYZ&state=ignored"));
    let credential = client.authenticate().await.unwrap();
    user.await.unwrap();

    assert_eq!(credential.access_token, "eyJ0eXAi");
    assert_eq!(credential.account_id, ACCOUNT_ID);
    assert_eq!(credential.account_name, "Acme Sandbox");
    assert_eq!(credential.base_uri, "https://demo.docusign.net");
    assert_eq!(credential.user_name, "Pat Signer");
    assert_eq!(credential.user_email, "pat@acme.example");

    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(temp_dir.path().join("authInfo.json")).unwrap())
            .unwrap();
    assert_eq!(stored["AccessToken"], "eyJ0eXAi");
    assert_eq!(stored["AccountId"], ACCOUNT_ID);

    // Second call is served from the cache; the mocks expect a single hit
    let again = client.authenticate().await.unwrap();
    assert_eq!(again, credential);
}

#[cfg(unix)]
#[tokio::test]
async fn test_zero_expiration_always_logs_in() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_token(&server, json!({"access_token": "eyJ0eXAi"})).await;
    mount_userinfo(&server, userinfo_with_accounts()).await;

    let redirect_uri = format!("http://127.0.0.1:{}/callback", free_port().await);
    let browser = fake_browser(temp_dir.path());
    let mut config = config(temp_dir.path(), &server.uri(), &redirect_uri, &browser);
    config.token_expiration_hours = 0.0;
    let client = client(config);
    client.cache().save(&cached_credential()).unwrap();

    let user = tokio::spawn(complete_sign_in(format!("{redirect_uri}/"), "code=XYZ"));
    let credential = client.authenticate().await.unwrap();
    user.await.unwrap();

    assert_eq!(credential.access_token, "eyJ0eXAi");
}

#[cfg(unix)]
#[tokio::test]
async fn test_listener_released_after_login() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_token(&server, json!({"access_token": "eyJ0eXAi"})).await;
    mount_userinfo(&server, userinfo_with_accounts()).await;

    let port = free_port().await;
    let redirect_uri = format!("http://127.0.0.1:{port}/");
    let browser = fake_browser(temp_dir.path());
    let client = client(config(temp_dir.path(), &server.uri(), &redirect_uri, &browser));

    let user = tokio::spawn(complete_sign_in(redirect_uri, "code=XYZ"));
    client.authenticate().await.unwrap();
    user.await.unwrap();

    tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("redirect port should be free after login");
}

// ============================================================================
// Failures leave the cache untouched
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_empty_access_token_fails() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_token(&server, json!({"access_token": ""})).await;

    let redirect_uri = format!("http://127.0.0.1:{}/", free_port().await);
    let browser = fake_browser(temp_dir.path());
    let client = client(config(temp_dir.path(), &server.uri(), &redirect_uri, &browser));

    let user = tokio::spawn(complete_sign_in(redirect_uri, "code=XYZ"));
    let err = client.authenticate().await.unwrap_err();
    user.await.unwrap();

    assert!(matches!(err, AuthError::AuthExchange(_)));
    assert!(!client.cache().path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_token_endpoint_error_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "code expired"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let redirect_uri = format!("http://127.0.0.1:{}/", free_port().await);
    let browser = fake_browser(temp_dir.path());
    let client = client(config(temp_dir.path(), &server.uri(), &redirect_uri, &browser));

    let user = tokio::spawn(complete_sign_in(redirect_uri, "code=XYZ"));
    let err = client.authenticate().await.unwrap_err();
    user.await.unwrap();

    assert!(matches!(err, AuthError::AuthExchange(ref msg) if msg.contains("invalid_grant")));
    assert!(!client.cache().path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_user_without_accounts_fails() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_token(&server, json!({"access_token": "eyJ0eXAi"})).await;
    mount_userinfo(&server, json!({"name": "Pat Signer", "accounts": []})).await;

    let redirect_uri = format!("http://127.0.0.1:{}/", free_port().await);
    let browser = fake_browser(temp_dir.path());
    let client = client(config(temp_dir.path(), &server.uri(), &redirect_uri, &browser));

    let user = tokio::spawn(complete_sign_in(redirect_uri, "code=XYZ"));
    let err = client.authenticate().await.unwrap_err();
    user.await.unwrap();

    assert!(matches!(err, AuthError::ProfileFetch(_)));
    assert!(!client.cache().path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_malformed_account_id_fails_validation() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_token(&server, json!({"access_token": "eyJ0eXAi"})).await;
    mount_userinfo(
        &server,
        json!({
            "name": "Pat Signer",
            "accounts": [{
                "account_id": "not-a-uuid",
                "account_name": "Broken",
                "base_uri": "https://demo.docusign.net"
            }]
        }),
    )
    .await;

    let redirect_uri = format!("http://127.0.0.1:{}/", free_port().await);
    let browser = fake_browser(temp_dir.path());
    let client = client(config(temp_dir.path(), &server.uri(), &redirect_uri, &browser));

    let user = tokio::spawn(complete_sign_in(redirect_uri, "code=XYZ"));
    let err = client.authenticate().await.unwrap_err();
    user.await.unwrap();

    assert!(matches!(err, AuthError::InvalidCredential(_)));
    assert!(!client.cache().path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_redirect_without_code_fails_before_exchange() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let redirect_uri = format!("http://127.0.0.1:{}/", free_port().await);
    let browser = fake_browser(temp_dir.path());
    let client = client(config(temp_dir.path(), &server.uri(), &redirect_uri, &browser));

    let user = tokio::spawn(complete_sign_in(redirect_uri, "error=access_denied"));
    let err = client.authenticate().await.unwrap_err();
    user.await.unwrap();

    assert!(matches!(err, AuthError::MissingAuthorizationCode(_)));
    assert!(!client.cache().path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_login_times_out_and_releases_port() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;

    let port = free_port().await;
    let redirect_uri = format!("http://127.0.0.1:{port}/");
    let browser = fake_browser(temp_dir.path());
    let mut config = config(temp_dir.path(), &server.uri(), &redirect_uri, &browser);
    config.login_timeout_seconds = 1;
    let client = client(config);

    let err = client.authenticate().await.unwrap_err();
    assert!(matches!(err, AuthError::LoginTimedOut { timeout_secs: 1 }));

    tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("redirect port should be free after a timeout");
    assert!(!client.cache().path().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_logout_forces_next_login() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;

    let port = free_port().await;
    let redirect_uri = format!("http://127.0.0.1:{port}/");
    let browser = fake_browser(temp_dir.path());
    let mut config = config(temp_dir.path(), &server.uri(), &redirect_uri, &browser);
    config.login_timeout_seconds = 1;
    let client = client(config);
    client.cache().save(&cached_credential()).unwrap();

    client.logout().unwrap();
    let err = client.authenticate().await.unwrap_err();
    assert!(matches!(err, AuthError::LoginTimedOut { .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_login_with_localhost_redirect_uri() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mount_token(&server, json!({"access_token": "eyJ0eXAi"})).await;
    mount_userinfo(&server, userinfo_with_accounts()).await;

    let redirect_uri = format!("http://localhost:{}/", free_port().await);
    let browser = fake_browser(temp_dir.path());
    let client = client(config(temp_dir.path(), &server.uri(), &redirect_uri, &browser));

    let user = tokio::spawn(complete_sign_in(redirect_uri, "code=XYZ"));
    let credential = client.authenticate().await.unwrap();
    user.await.unwrap();

    assert_eq!(credential.account_id, ACCOUNT_ID);
    assert!(client.cache().path().exists());
}

// ============================================================================
// Cancellation
// ============================================================================

/// Whether `pid` is a live (not zombie) process
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_dropped_login_kills_browser_and_frees_port() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // Browser that starts a helper of its own, like a real one does
    let pid_file = temp_dir.path().join("browser.pids");
    let browser = temp_dir.path().join("forking-browser");
    std::fs::write(
        &browser,
        format!(
            "#!/bin/sh\nsleep 30 &\necho \"$$ $!\" > {}\nexec sleep 30\n",
            pid_file.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&browser, std::fs::Permissions::from_mode(0o755)).unwrap();

    let port = free_port().await;
    let redirect_uri = format!("http://127.0.0.1:{port}/");
    let mut config = config(temp_dir.path(), &server.uri(), &redirect_uri, &browser);
    config.login_timeout_seconds = 0;
    let client = client(config);

    let mut login = Box::pin(client.authenticate());
    let mut pids = Vec::new();
    for _ in 0..100 {
        tokio::select! {
            result = &mut login => panic!("login ended on its own: {result:?}"),
            () = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        if let Ok(text) = std::fs::read_to_string(&pid_file) {
            pids = text
                .split_whitespace()
                .filter_map(|pid| pid.parse::<u32>().ok())
                .collect();
            if pids.len() == 2 {
                break;
            }
        }
    }
    assert_eq!(pids.len(), 2, "fake browser never started");
    assert!(pids.iter().all(|&pid| process_alive(pid)));

    drop(login);

    let mut browser_gone = false;
    for _ in 0..100 {
        if pids.iter().all(|&pid| !process_alive(pid)) {
            browser_gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(browser_gone, "browser process group survived the dropped login");

    let mut port_free = false;
    for _ in 0..100 {
        if tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok() {
            port_free = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(port_free, "redirect port still bound after the dropped login");
    assert!(!client.cache().path().exists());
}
