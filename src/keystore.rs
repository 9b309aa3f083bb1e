//! Lazily-decrypted, cached API-key set.
//!
//! The encrypted key file is read and decrypted at most once per process:
//! the first authorization check pays for the file read and the KDF, every
//! later check hits the in-memory cache. Concurrent first requests are
//! serialized by [`tokio::sync::OnceCell`], so racing initializers converge
//! on a single decryption.
//!
//! A missing key file or passphrase is the documented "feature disabled"
//! state, not an error: [`KeyStore::load_keys`] returns an empty slice
//! immediately. A failed decryption (wrong passphrase, corrupt file) also
//! degrades to "no keys" — it is never cached, so a later request retries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::crypto;
use crate::error::Error;

/// In-process store of decrypted API keys.
pub struct KeyStore {
    key_file: Option<PathBuf>,
    passphrase: Option<String>,
    cache: OnceCell<Vec<String>>,
    decrypts: AtomicU64,
}

impl KeyStore {
    /// Create a store for the given key file, taking the passphrase from the
    /// [`crypto::PASSPHRASE_ENV`] environment variable.
    pub fn new(key_file: Option<PathBuf>) -> Self {
        let passphrase = std::env::var(crypto::PASSPHRASE_ENV).ok();
        Self::with_passphrase(key_file, passphrase)
    }

    /// Create a store with an explicit passphrase (test seam; production
    /// code goes through [`KeyStore::new`]).
    pub fn with_passphrase(key_file: Option<PathBuf>, passphrase: Option<String>) -> Self {
        Self {
            key_file,
            passphrase,
            cache: OnceCell::new(),
            decrypts: AtomicU64::new(0),
        }
    }

    /// Whether both the key file and the passphrase are present.
    ///
    /// When false, private routes are in the misconfigured state: every
    /// request is denied and an operator diagnostic is emitted once.
    pub fn is_configured(&self) -> bool {
        self.key_file.is_some() && self.passphrase.is_some()
    }

    /// Return the decrypted keys, loading them on first use.
    ///
    /// Empty when unconfigured or when decryption fails. Empty lines in the
    /// decrypted file are dropped; keys are kept verbatim otherwise (exact
    /// string comparison downstream, no normalization).
    pub async fn load_keys(&self) -> &[String] {
        let (Some(path), Some(passphrase)) = (&self.key_file, &self.passphrase) else {
            return &[];
        };

        let loaded = self
            .cache
            .get_or_try_init(|| async {
                self.decrypts.fetch_add(1, Ordering::Relaxed);
                let armored = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| Error::io(path, e))?;
                let plaintext = crypto::decrypt(&armored, passphrase)?;
                let keys: Vec<String> = plaintext
                    .lines()
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
                info!(keys = keys.len(), "API key file decrypted and cached");
                Ok::<_, Error>(keys)
            })
            .await;

        match loaded {
            Ok(keys) => keys,
            Err(e) => {
                // Not cached: the next request retries. Nothing is
                // authorized in the meantime.
                warn!(error = %e, "API key file unavailable, denying all private requests");
                &[]
            }
        }
    }

    /// Number of decryption attempts so far. Stays at 1 across any number of
    /// successful [`KeyStore::load_keys`] calls.
    pub fn decrypt_count(&self) -> u64 {
        self.decrypts.load(Ordering::Relaxed)
    }

    /// Drop the cached keys so the next load re-reads the file.
    pub fn invalidate(&mut self) {
        self.cache = OnceCell::new();
    }
}
