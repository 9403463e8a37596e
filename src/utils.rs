//! String helpers shared by the login flow
//!
//! Keeps secrets and upstream response bodies out of logs and error messages
//! without cutting a multi-byte character in half.

/// Number of leading characters of a secret that may be shown
const VISIBLE_SECRET_BYTES: usize = 6;

/// Safely truncate a string at a UTF-8 character boundary.
///
/// Returns a slice of at most `max_bytes` bytes.
///
/// # Example
/// ```
/// use dsbd_auth::utils::safe_truncate;
///
/// let text = "Status: 🔍 Active";
/// assert_eq!(safe_truncate(text, 10), "Status: ");
/// ```
#[inline]
#[must_use]
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    &s[..boundary]
}

/// Truncate a string for display, appending "..." if anything was cut.
///
/// # Example
/// ```
/// use dsbd_auth::utils::truncate_for_display;
///
/// assert_eq!(truncate_for_display("This is a long message", 10), "This is a ...");
/// ```
#[must_use]
pub fn truncate_for_display(s: &str, max_bytes: usize) -> String {
    let truncated = safe_truncate(s, max_bytes);
    if truncated.len() < s.len() {
        format!("{truncated}...")
    } else {
        truncated.to_string()
    }
}

/// Mask a secret (token, auth code, client secret) for logging.
///
/// Short secrets are hidden entirely.
///
/// # Example
/// ```
/// use dsbd_auth::utils::mask_secret;
///
/// assert_eq!(mask_secret("eyJ0eXAiOiJNVCJ9.abc"), "eyJ0eX***");
/// assert_eq!(mask_secret("abc"), "***");
/// ```
#[must_use]
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= VISIBLE_SECRET_BYTES * 2 {
        return "***".to_string();
    }
    format!("{}***", safe_truncate(secret, VISIBLE_SECRET_BYTES))
}
