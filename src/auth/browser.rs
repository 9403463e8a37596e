//! Authorization URL construction and browser process management

use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use tokio::process::{Child, Command};

/// Build the URL the user opens to sign in
///
/// Inputs are concatenated as-is. Values that need percent-encoding are not
/// escaped here; configuration is expected to supply URL-safe values.
#[must_use]
pub fn build_authorization_url(oauth_base: &str, client_id: &str, redirect_uri: &str) -> String {
    format!(
        "{oauth_base}/auth?response_type=code&scope=signature&client_id={client_id}&redirect_uri={redirect_uri}"
    )
}

/// Browsers that can drive the sign-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Browser {
    /// Microsoft Edge
    #[default]
    Edge,
    /// Google Chrome
    Chrome,
    /// Mozilla Firefox
    Firefox,
}

impl Browser {
    /// All supported browsers
    pub const ALL: [Browser; 3] = [Browser::Edge, Browser::Chrome, Browser::Firefox];

    /// Configuration name of the browser
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Browser::Edge => "edge",
            Browser::Chrome => "chrome",
            Browser::Firefox => "firefox",
        }
    }

    /// Primary executable name
    #[must_use]
    pub fn executable(self) -> &'static str {
        match self {
            Browser::Edge => "msedge",
            Browser::Chrome => "chrome",
            Browser::Firefox => "firefox",
        }
    }

    /// Flag that opens a private/incognito window
    #[must_use]
    pub fn private_flag(self) -> &'static str {
        match self {
            Browser::Edge => "-inprivate",
            Browser::Chrome => "--incognito",
            Browser::Firefox => "-private-window",
        }
    }

    /// Executable names searched on `PATH`, primary name first
    fn executable_candidates(self) -> &'static [&'static str] {
        match self {
            Browser::Edge => &["msedge", "microsoft-edge", "microsoft-edge-stable"],
            Browser::Chrome => &[
                "chrome",
                "google-chrome",
                "google-chrome-stable",
                "chromium",
            ],
            Browser::Firefox => &["firefox"],
        }
    }

    /// Command-line arguments that open `url` in a new window
    ///
    /// Firefox's private-window flag takes the URL itself, so it replaces
    /// `--new-window` instead of preceding it.
    #[must_use]
    pub fn launch_args(self, url: &str, use_private: bool) -> Vec<String> {
        let mut args = Vec::with_capacity(3);
        match self {
            Browser::Edge | Browser::Chrome => {
                if use_private {
                    args.push(self.private_flag().to_string());
                }
                args.push("--new-window".to_string());
            }
            Browser::Firefox => {
                let flag = if use_private {
                    self.private_flag()
                } else {
                    "--new-window"
                };
                args.push(flag.to_string());
            }
        }
        args.push(url.to_string());
        args
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Browser {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Browser::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AuthError::unsupported_browser(s))
    }
}

impl TryFrom<String> for Browser {
    type Error = AuthError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Starts the configured browser on the authorization URL
#[derive(Debug, Clone, Default)]
pub struct BrowserLauncher {
    browser: Browser,
    use_private: bool,
    executable: Option<PathBuf>,
}

impl BrowserLauncher {
    /// Create a launcher that searches `PATH` for the browser
    #[must_use]
    pub fn new(browser: Browser, use_private: bool) -> Self {
        Self {
            browser,
            use_private,
            executable: None,
        }
    }

    /// Use an explicit executable instead of searching `PATH`
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Get the configured browser
    #[must_use]
    pub fn browser(&self) -> Browser {
        self.browser
    }

    /// Whether a private window is requested
    #[must_use]
    pub fn use_private(&self) -> bool {
        self.use_private
    }

    /// Locate the browser executable
    ///
    /// # Errors
    ///
    /// Returns `AuthError::BrowserLaunch` if no candidate executable exists.
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.executable {
            if path.is_file() {
                return Ok(path.clone());
            }
            return which::which(path).map_err(|_| {
                AuthError::browser_launch(format!(
                    "configured executable {} for {} does not exist",
                    path.display(),
                    self.browser
                ))
            });
        }

        for name in self.browser.executable_candidates() {
            if let Ok(path) = which::which(name) {
                return Ok(path);
            }
        }

        for path in well_known_locations(self.browser) {
            if path.is_file() {
                return Ok(path);
            }
        }

        Err(AuthError::browser_launch(format!(
            "{} not found; install it, put '{}' on PATH, or set BrowserPath",
            self.browser,
            self.browser.executable()
        )))
    }

    /// Open `url` in a new browser window
    ///
    /// # Errors
    ///
    /// Returns `AuthError::BrowserLaunch` if the executable cannot be found
    /// or the process fails to start.
    pub fn launch(&self, url: &str) -> Result<BrowserProcess> {
        let executable = self.resolve_executable()?;
        let mut cmd = Command::new(&executable);
        cmd.args(self.browser.launch_args(url, self.use_private))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group so the whole tree can be terminated together
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            AuthError::browser_launch(format!("{}: {e}", executable.display()))
        })?;

        tracing::info!(
            browser = %self.browser,
            private = self.use_private,
            pid = child.id(),
            "Browser launched for sign-in"
        );

        Ok(BrowserProcess {
            browser: self.browser,
            child: Some(child),
        })
    }
}

/// Install locations checked when the browser is not on `PATH`
fn well_known_locations(browser: Browser) -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let relative = match browser {
            Browser::Edge => r"Microsoft\Edge\Application\msedge.exe",
            Browser::Chrome => r"Google\Chrome\Application\chrome.exe",
            Browser::Firefox => r"Mozilla Firefox\firefox.exe",
        };
        ["ProgramFiles", "ProgramFiles(x86)", "LOCALAPPDATA"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .map(|root| PathBuf::from(root).join(relative))
            .collect()
    }

    #[cfg(target_os = "macos")]
    {
        let app = match browser {
            Browser::Edge => "Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
            Browser::Chrome => "Google Chrome.app/Contents/MacOS/Google Chrome",
            Browser::Firefox => "Firefox.app/Contents/MacOS/firefox",
        };
        vec![PathBuf::from("/Applications").join(app)]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let _ = browser;
        Vec::new()
    }
}

/// Handle to a launched browser
///
/// Killing targets the process that was spawned and everything it started;
/// dropping the handle does the same. Browsers that hand the URL
/// to an already running instance and exit leave that other instance alive,
/// and with several instances of the same browser open the window that ends
/// up closed may not be the sign-in one.
#[derive(Debug)]
pub struct BrowserProcess {
    browser: Browser,
    child: Option<Child>,
}

impl BrowserProcess {
    /// Get the browser this process belongs to
    #[must_use]
    pub fn browser(&self) -> Browser {
        self.browser
    }

    /// OS process id, if the process has not been reaped yet
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Force-terminate the browser and its child processes
    ///
    /// Calling this more than once is harmless.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the process could not be signalled or reaped.
    pub async fn kill(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // Not reaped yet, so the pid still names this process group
        if let Some(pid) = child.id() {
            if let Err(e) = kill_tree(pid).await {
                tracing::debug!(pid, "Process tree kill failed, killing process only: {e}");
            }
        }

        if child.try_wait()?.is_some() {
            tracing::debug!(browser = %self.browser, "Browser process exited");
            return Ok(());
        }

        // Reaps the process; sends SIGKILL / TerminateProcess if still alive
        child.kill().await?;
        tracing::debug!(browser = %self.browser, "Browser process terminated");
        Ok(())
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                if let Err(e) = kill_tree_blocking(pid) {
                    tracing::debug!(pid, "Process tree kill on drop failed: {e}");
                }
            }
            let _ = child.start_kill();
        }
    }
}

/// Program and arguments that force-terminate the tree rooted at `pid`
#[cfg(unix)]
fn tree_kill_command(pid: u32) -> (&'static str, Vec<String>) {
    // The browser leads its own process group, see `BrowserLauncher::launch`
    ("kill", vec!["-KILL".into(), "--".into(), format!("-{pid}")])
}

#[cfg(windows)]
fn tree_kill_command(pid: u32) -> (&'static str, Vec<String>) {
    (
        "taskkill",
        vec!["/PID".into(), pid.to_string(), "/T".into(), "/F".into()],
    )
}

fn check_kill_status(program: &str, status: std::process::ExitStatus) -> std::io::Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("{program} exited with {status}")))
    }
}

async fn kill_tree(pid: u32) -> std::io::Result<()> {
    let (program, args) = tree_kill_command(pid);
    let status = Command::new(program)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    check_kill_status(program, status)
}

/// Blocking variant for `Drop`, where nothing can be awaited
fn kill_tree_blocking(pid: u32) -> std::io::Result<()> {
    let (program, args) = tree_kill_command(pid);
    let status = std::process::Command::new(program)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    check_kill_status(program, status)
}
