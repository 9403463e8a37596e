//! Credential record and its on-disk cache

use crate::error::{AuthError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// File name of the cached credential inside the configured root directory
pub const CACHE_FILE_NAME: &str = "authInfo.json";

/// Validated bundle of access token and account context
///
/// Serialized with PascalCase keys so the cache file stays compatible with
/// `authInfo.json` files written by earlier versions of the tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Credential {
    /// Opaque bearer token
    pub access_token: String,
    /// Platform account identifier (UUID)
    pub account_id: String,
    /// Absolute base URL for API calls against this account
    pub base_uri: String,
    /// Display name of the signed-in user
    pub user_name: String,
    /// Display name of the selected account
    pub account_name: String,
    /// Email of the signed-in user
    pub user_email: String,
}

impl Credential {
    /// Check the validity invariant, reporting which field broke it
    ///
    /// Display fields are never checked. The access token is opaque and is
    /// only checked for presence.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredential` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.access_token.is_empty() {
            return Err(AuthError::invalid_credential("access token is empty"));
        }
        if let Err(e) = Url::parse(&self.base_uri) {
            return Err(AuthError::invalid_credential(format!(
                "base URI '{}' is not absolute: {e}",
                self.base_uri
            )));
        }
        if let Err(e) = Uuid::parse_str(&self.account_id) {
            return Err(AuthError::invalid_credential(format!(
                "account id '{}' is not a UUID: {e}",
                self.account_id
            )));
        }
        Ok(())
    }

    /// Whether the credential satisfies the validity invariant
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Get the Authorization header value for API calls
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Credential cache backed by a single JSON file
///
/// Freshness is judged from the file's modification time, not from anything
/// stored inside it.
#[derive(Debug, Clone)]
pub struct CredentialCache {
    path: PathBuf,
    max_age: Duration,
}

impl CredentialCache {
    /// Create a cache at an explicit file path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    /// Create a cache at `{root}/authInfo.json`
    #[must_use]
    pub fn in_directory(root: impl AsRef<Path>, max_age: Duration) -> Self {
        Self::new(root.as_ref().join(CACHE_FILE_NAME), max_age)
    }

    /// Get the cache file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the maximum age a cached credential may have
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Load a fresh, valid credential, or `None` on any kind of miss
    #[must_use]
    pub fn try_load(&self) -> Option<Credential> {
        self.try_load_at(SystemTime::now())
    }

    /// Same as [`try_load`](Self::try_load) with an explicit notion of "now"
    #[must_use]
    pub fn try_load_at(&self, now: SystemTime) -> Option<Credential> {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), "No cached credential: {e}");
                return None;
            }
        };

        // A timestamp in the future counts as just written
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age >= self.max_age {
            tracing::debug!(
                age_secs = age.as_secs(),
                max_age_secs = self.max_age.as_secs(),
                "Cached credential is stale"
            );
            return None;
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Could not read cached credential: {e}");
                return None;
            }
        };

        let credential: Credential = match serde_json::from_str(&content) {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Discarding corrupt cached credential: {e}");
                return None;
            }
        };

        if let Err(e) = credential.validate() {
            tracing::warn!("Discarding cached credential: {e}");
            return None;
        }

        Some(credential)
    }

    /// Persist a credential, replacing any previous file in one step
    ///
    /// The JSON is written to a temporary file next to the target and then
    /// renamed over it, so a later load never sees a half-written file.
    /// On Unix the file is readable by the owner only.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::CachePersistFailure` if the directory cannot be
    /// created or the file cannot be written or renamed.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        std::fs::create_dir_all(dir).map_err(|e| {
            AuthError::cache_persist(format!("create directory {}: {e}", dir.display()))
        })?;

        let content = serde_json::to_string_pretty(credential)?;

        // NamedTempFile is created with 0600 permissions on Unix
        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            AuthError::cache_persist(format!("create temp file in {}: {e}", dir.display()))
        })?;
        std::io::Write::write_all(&mut file, content.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| AuthError::cache_persist(format!("write temp file: {e}")))?;

        file.persist(&self.path).map_err(|e| {
            AuthError::cache_persist(format!("replace {}: {}", self.path.display(), e.error))
        })?;

        tracing::debug!(path = %self.path.display(), "Credential cached");
        Ok(())
    }

    /// Delete the cached credential if present
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be deleted.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Io(e)),
        }
    }
}
