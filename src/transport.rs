//! Transport security: HTTPS enforcement and TLS certificate loading.
//!
//! The [`TransportGuard`] runs first in the request pipeline, before
//! authorization and before the user handler. When `force_secure` is on and
//! a request arrives over plain HTTP, it produces the `https://` equivalent
//! URL (same host, same path and query) and the pipeline answers with a
//! GET-style redirect instead of invoking anything further.

use axum::http::Uri;
use axum_server::tls_rustls::RustlsConfig;
use std::path::Path;

use crate::config::TransportConfig;
use crate::error::Error;

/// Which listener a request arrived on. Injected as a per-listener request
/// extension so the guard knows the inbound channel without sniffing sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// Decides whether a request must be redirected to a secure channel.
#[derive(Debug, Clone, Copy)]
pub struct TransportGuard {
    force_secure: bool,
}

impl TransportGuard {
    pub fn new(config: Option<&TransportConfig>) -> Self {
        Self {
            force_secure: config.is_some_and(|t| t.force_secure),
        }
    }

    /// Whether the request is considered secure: either it arrived on the
    /// TLS listener, or a fronting proxy vouches via `x-forwarded-proto`.
    pub fn is_secure(scheme: Scheme, forwarded_proto: Option<&str>) -> bool {
        scheme == Scheme::Https || forwarded_proto == Some("https")
    }

    /// Return the redirect target for an insecure request, or `None` when no
    /// redirect is needed (guard inactive, already secure, or no `Host`
    /// header to rebuild the URL from).
    pub fn requires_redirect(
        &self,
        secure: bool,
        host: Option<&str>,
        uri: &Uri,
    ) -> Option<String> {
        if !self.force_secure || secure {
            return None;
        }
        let host = host?;
        let path_and_query = uri
            .path_and_query()
            .map_or_else(|| uri.path(), |pq| pq.as_str());
        Some(format!("https://{host}{path_and_query}"))
    }
}

/// Load TLS material for the server, failing fast when either file is
/// unreadable. Explicitly requested transport security must never degrade
/// to plaintext.
pub async fn load_tls_config(cert: &Path, key: &Path) -> Result<RustlsConfig, Error> {
    for path in [cert, key] {
        if !path.exists() {
            return Err(Error::TlsCert {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }
    }
    RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|e| Error::TlsCert {
            path: cert.to_path_buf(),
            source: e,
        })
}
