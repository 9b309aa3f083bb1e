//! Library error types.
//!
//! Per-request authorization failures never surface here — they degrade to a
//! deterministic 403 on the wire. This taxonomy covers the operator-facing
//! failures: unreadable configuration, cipher failures in the key tooling,
//! and fatal startup conditions (TLS material, socket bind).

use std::path::PathBuf;

/// Errors produced by configuration loading, the key tooling, and server
/// startup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem access failed (key file, config file, log directory).
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ciphertext could not be decrypted — wrong passphrase or corrupt data.
    /// Deliberately carries no detail beyond the cause category.
    #[error("decryption failed: wrong passphrase or corrupt ciphertext")]
    Decrypt,

    /// Malformed configuration file.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// TLS certificate or private key unreadable at startup. Fatal: the
    /// server refuses to silently fall back to plaintext.
    #[error("TLS material unreadable ({path}): {source}")]
    TlsCert {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not bind the listen socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server terminated with an error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl Error {
    /// Helper for wrapping filesystem errors with the offending path.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
