//! One-shot loopback HTTP listener that captures the OAuth redirect

use crate::error::{AuthError, Result};
use reqwest::Url;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MAX_REQUEST_HEAD_BYTES: usize = 8192;
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

const RESPONSE_OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const RESPONSE_NOT_FOUND: &str =
    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const RESPONSE_BAD_REQUEST: &str =
    "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

type CodeSlot = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Local HTTP endpoint bound at the configured redirect URI
///
/// Accepting and answering runs on background tasks. The first request whose
/// path falls under the redirect path is answered with `200 OK` and its
/// `code` parameter is handed to [`await_code`](Self::await_code); nothing
/// after it is serviced. Requests for other paths get `404` and are otherwise
/// ignored, so favicon fetches and browser pre-connects do not end the wait.
#[derive(Debug)]
pub struct LoopbackListener {
    redirect_path: Arc<str>,
    local_addrs: Vec<SocketAddr>,
    code_rx: Option<oneshot::Receiver<String>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl LoopbackListener {
    /// Bind every address the redirect URI's host resolves to
    ///
    /// A trailing slash is added to the redirect path if missing. Port `0`
    /// picks a free port, shared by all bound addresses.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ListenerBindFailure` if the URI is not a plain
    /// `http` URI with a host, or if no address could be bound.
    pub async fn start(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| AuthError::listener_bind(format!("invalid redirect URI '{redirect_uri}': {e}")))?;
        if url.scheme() != "http" {
            return Err(AuthError::listener_bind(format!(
                "redirect URI '{redirect_uri}' must use http"
            )));
        }
        if url.host_str().is_none() {
            return Err(AuthError::listener_bind(format!(
                "redirect URI '{redirect_uri}' has no host"
            )));
        }

        let mut candidates = url
            .socket_addrs(|| Some(80))
            .map_err(|e| AuthError::listener_bind(format!("resolve '{redirect_uri}': {e}")))?;
        candidates.dedup();

        let mut listeners = Vec::with_capacity(candidates.len());
        let mut bind_errors = Vec::new();
        let mut shared_port: Option<u16> = None;
        for candidate in candidates {
            let addr = match shared_port {
                Some(port) if candidate.port() == 0 => SocketAddr::new(candidate.ip(), port),
                _ => candidate,
            };
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    if candidate.port() == 0 && shared_port.is_none() {
                        shared_port = Some(listener.local_addr()?.port());
                    }
                    listeners.push(listener);
                }
                Err(e) => bind_errors.push(format!("{addr} ({e})")),
            }
        }

        if listeners.is_empty() {
            return Err(AuthError::listener_bind(format!(
                "{redirect_uri}: {}",
                bind_errors.join("; ")
            )));
        }
        if !bind_errors.is_empty() {
            tracing::debug!("Some redirect addresses could not be bound: {}", bind_errors.join("; "));
        }

        let redirect_path: Arc<str> = normalize_path(url.path()).into();
        let local_addrs = listeners
            .iter()
            .map(TcpListener::local_addr)
            .collect::<std::io::Result<Vec<_>>>()?;

        let (code_tx, code_rx) = oneshot::channel();
        let slot: CodeSlot = Arc::new(Mutex::new(Some(code_tx)));
        let shutdown = CancellationToken::new();

        let tasks = listeners
            .into_iter()
            .map(|listener| {
                tokio::spawn(accept_loop(
                    listener,
                    Arc::clone(&redirect_path),
                    Arc::clone(&slot),
                    shutdown.clone(),
                ))
            })
            .collect();

        tracing::debug!(?local_addrs, path = %redirect_path, "Redirect listener started");

        Ok(Self {
            redirect_path,
            local_addrs,
            code_rx: Some(code_rx),
            shutdown,
            tasks,
        })
    }

    /// Addresses the listener is bound to
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Normalized path (with trailing slash) the listener answers under
    #[must_use]
    pub fn redirect_path(&self) -> &str {
        &self.redirect_path
    }

    /// Wait for the redirect and return its `code` parameter
    ///
    /// A redirect without `code` yields an empty string. The wait has no
    /// timeout of its own and is cancel-safe, so callers can bound it with
    /// `tokio::time::timeout` and call again.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingAuthorizationCode` if the code was already
    /// taken or the listener stopped before any redirect arrived.
    pub async fn await_code(&mut self) -> Result<String> {
        let rx = self
            .code_rx
            .as_mut()
            .ok_or_else(|| AuthError::missing_code("redirect was already consumed"))?;
        let received = rx.await;
        self.code_rx = None;
        received.map_err(|_| AuthError::missing_code("listener stopped before a redirect arrived"))
    }

    /// Unbind all addresses
    ///
    /// Safe to call whether or not a request was received, and more than once.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        tracing::debug!("Redirect listener stopped");
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

fn normalize_path(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

async fn accept_loop(
    listener: TcpListener,
    redirect_path: Arc<str>,
    slot: CodeSlot,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (socket, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::debug!("Redirect listener accept failed: {e}");
                continue;
            }
        };

        // Each connection gets its own task so an idle pre-connect cannot
        // hold up the real redirect
        let redirect_path = Arc::clone(&redirect_path);
        let slot = Arc::clone(&slot);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = handle_connection(socket, peer, &redirect_path, &slot, &shutdown) => {}
            }
        });
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    redirect_path: &str,
    slot: &CodeSlot,
    shutdown: &CancellationToken,
) {
    let head = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_head(&mut socket)).await {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            tracing::debug!(%peer, "Could not read redirect request: {e}");
            return;
        }
        Err(_) => {
            tracing::debug!(%peer, "Idle connection closed");
            return;
        }
    };

    let Some(target) = request_target(&head) else {
        let _ = respond(&mut socket, RESPONSE_BAD_REQUEST).await;
        return;
    };

    let Some(code) = match_redirect(target, redirect_path) else {
        tracing::debug!(%peer, "Ignoring request outside redirect path");
        let _ = respond(&mut socket, RESPONSE_NOT_FOUND).await;
        return;
    };

    let sender = slot.lock().map(|mut guard| guard.take()).unwrap_or_default();
    let Some(sender) = sender else {
        // Redirect already captured; later requests are not serviced
        return;
    };

    if let Err(e) = respond(&mut socket, RESPONSE_OK).await {
        tracing::debug!(%peer, "Could not answer redirect: {e}");
    }
    tracing::info!(has_code = !code.is_empty(), "Redirect received");
    let _ = sender.send(code);
    shutdown.cancel();
}

async fn read_request_head(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_HEAD_BYTES {
            break;
        }
    }
    if buffer.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "empty request",
        ));
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Request target from the request line, e.g. `/callback?code=abc`
fn request_target(head: &str) -> Option<&str> {
    let line = head.lines().next()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;
    target.starts_with('/').then_some(target)
}

/// Return the `code` parameter if `target` falls under `redirect_path`
///
/// A missing `code` parameter yields an empty string.
fn match_redirect(target: &str, redirect_path: &str) -> Option<String> {
    let url = Url::parse(&format!("http://loopback{target}")).ok()?;
    let path = normalize_path(url.path());
    let under_redirect = path
        .get(..redirect_path.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(redirect_path));
    if !under_redirect {
        return None;
    }

    let code = url
        .query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();
    Some(code)
}

async fn respond(socket: &mut TcpStream, response: &str) -> std::io::Result<()> {
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    socket.shutdown().await
}
