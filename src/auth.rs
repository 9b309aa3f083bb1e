//! API key authorization for private routes.
//!
//! Routes registered with `private: true` require a credential matching one
//! of the decrypted keys. The credential may arrive in the `Authorization`
//! header or as an `authorization` field in the request body; the two
//! sources are equally valid, either match suffices.
//!
//! Denial and misconfiguration are indistinguishable on the wire (same 403,
//! same body); misconfiguration additionally emits a one-time operator
//! diagnostic naming the two required inputs.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::crypto;
use crate::keystore::KeyStore;

/// Fixed denial body, shared by the `Denied` and `Misconfigured` verdicts.
pub const DENIAL_MESSAGE: &str = "Missing proper authorization.";

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A supplied credential matched a cached key; invoke the handler.
    Allowed,
    /// No credential matched; respond 403.
    Denied,
    /// No key file or passphrase is configured. Responds 403 exactly like
    /// `Denied`; the distinction exists for the operator, not the wire.
    Misconfigured,
}

/// Decides allow/deny for private routes against the [`KeyStore`].
pub struct Authorizer {
    store: KeyStore,
    misconfig_reported: AtomicBool,
}

impl Authorizer {
    pub fn new(store: KeyStore) -> Self {
        Self {
            store,
            misconfig_reported: AtomicBool::new(false),
        }
    }

    /// Whether the backing key store has both its configuration inputs.
    pub fn is_configured(&self) -> bool {
        self.store.is_configured()
    }

    /// Check the supplied credentials against the cached key set.
    ///
    /// Header and body credentials are equal-rank: either one matching any
    /// key yields `Allowed`. Comparison is exact string equality. Read-only
    /// apart from the store's own lazy first load.
    pub async fn authorize(
        &self,
        header_credential: Option<&str>,
        body_credential: Option<&str>,
    ) -> Verdict {
        if !self.store.is_configured() {
            if !self.misconfig_reported.swap(true, Ordering::Relaxed) {
                warn!(
                    "private route requested but authorization is not configured; \
                     set `key_file` in the config and the {} environment variable",
                    crypto::PASSPHRASE_ENV
                );
            }
            return Verdict::Misconfigured;
        }

        let keys = self.store.load_keys().await;
        let matches = |credential: Option<&str>| {
            credential.is_some_and(|c| keys.iter().any(|k| k == c))
        };
        if matches(header_credential) || matches(body_credential) {
            Verdict::Allowed
        } else {
            Verdict::Denied
        }
    }

    /// Decryption-attempt counter, exposed for instrumentation.
    pub fn decrypt_count(&self) -> u64 {
        self.store.decrypt_count()
    }
}

/// Pull the body credential out of a buffered request body.
///
/// The field is named `authorization` in either a JSON object or a
/// urlencoded form, the same name the header uses. Anything unparseable
/// simply yields no credential.
pub fn body_credential(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        return value
            .get("authorization")
            .and_then(|v| v.as_str())
            .map(str::to_string);
    }
    serde_urlencoded::from_str::<Vec<(String, String)>>(body)
        .ok()?
        .into_iter()
        .find(|(name, _)| name == "authorization")
        .map(|(_, value)| value)
}

/// The fixed 403 response sent for both deny verdicts.
pub fn denial_response() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "message": DENIAL_MESSAGE })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn configured_authorizer(dir: &tempfile::TempDir, keys: &str) -> Authorizer {
        let path = dir.path().join("keys.enc");
        std::fs::write(&path, crypto::encrypt(keys, "pass")).unwrap();
        Authorizer::new(KeyStore::with_passphrase(Some(path), Some("pass".into())))
    }

    #[tokio::test]
    async fn test_unconfigured_is_misconfigured() {
        let authorizer = Authorizer::new(KeyStore::with_passphrase(None, None));
        let verdict = authorizer.authorize(Some("abc123"), None).await;
        assert_eq!(verdict, Verdict::Misconfigured);
    }

    #[tokio::test]
    async fn test_header_credential_match() {
        let dir = tempfile::tempdir().unwrap();
        let authorizer = configured_authorizer(&dir, "abc123\ndef456\n");
        assert_eq!(
            authorizer.authorize(Some("def456"), None).await,
            Verdict::Allowed
        );
    }

    #[tokio::test]
    async fn test_body_credential_match() {
        let dir = tempfile::tempdir().unwrap();
        let authorizer = configured_authorizer(&dir, "abc123\n");
        // Body credential is equal-rank with the header
        assert_eq!(
            authorizer.authorize(Some("wrong"), Some("abc123")).await,
            Verdict::Allowed
        );
        assert_eq!(
            authorizer.authorize(None, Some("abc123")).await,
            Verdict::Allowed
        );
    }

    #[tokio::test]
    async fn test_no_match_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let authorizer = configured_authorizer(&dir, "abc123\n");
        assert_eq!(authorizer.authorize(Some("nope"), None).await, Verdict::Denied);
        assert_eq!(authorizer.authorize(None, None).await, Verdict::Denied);
    }

    #[tokio::test]
    async fn test_exact_equality_no_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let authorizer = configured_authorizer(&dir, "abc123\n");
        assert_eq!(
            authorizer.authorize(Some("ABC123"), None).await,
            Verdict::Denied
        );
        assert_eq!(
            authorizer.authorize(Some("abc123 "), None).await,
            Verdict::Denied
        );
    }

    #[tokio::test]
    async fn test_checks_reuse_cached_keys() {
        let dir = tempfile::tempdir().unwrap();
        let authorizer = configured_authorizer(&dir, "abc123\n");
        for _ in 0..5 {
            authorizer.authorize(Some("abc123"), None).await;
        }
        assert_eq!(authorizer.decrypt_count(), 1);
    }

    #[test]
    fn test_body_credential_json() {
        assert_eq!(
            body_credential(r#"{"authorization":"abc123","x":1}"#),
            Some("abc123".to_string())
        );
        assert_eq!(body_credential(r#"{"x":1}"#), None);
        assert_eq!(body_credential(r#"{"authorization":42}"#), None);
    }

    #[test]
    fn test_body_credential_urlencoded() {
        assert_eq!(
            body_credential("name=doc&authorization=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(body_credential("name=doc"), None);
    }

    #[test]
    fn test_body_credential_garbage() {
        assert_eq!(body_credential("\x00\x01 not a body"), None);
    }

    #[tokio::test]
    async fn test_broken_store_denies() {
        let authorizer = Authorizer::new(KeyStore::with_passphrase(
            Some(PathBuf::from("/nonexistent/keys.enc")),
            Some("pass".into()),
        ));
        assert_eq!(
            authorizer.authorize(Some("abc123"), None).await,
            Verdict::Denied
        );
    }
}
