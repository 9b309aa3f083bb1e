//! Request completion logging.
//!
//! Every request produces exactly one log line, emitted when the response
//! has actually been produced by the pipeline, not when the user handler
//! function returns. A handler that suspends on I/O before responding still
//! yields a single line carrying the final status code.
//!
//! Exactly-once is structural (the logger is the outermost layer, so every
//! terminal path (redirect, denial, handler response) flows through one
//! emission point) and defended in depth by the [`RequestContext::mark_logged`]
//! flag. A [`DisconnectGuard`] covers the remaining path: if the client drops
//! the connection and the pipeline future is cancelled, the guard's `Drop`
//! emits a best-effort "client disconnected" line instead of leaking the
//! request silently.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, OnceLock};

use axum::http::{Method, StatusCode, Uri};
use tracing::{info, warn};

use crate::config::Config;

static INIT: Once = Once::new();
static APPENDER_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initialize the tracing subscriber once per process.
///
/// Called from [`crate::Server::listen`]; also invoked lazily by the logging
/// middleware so a request arriving before `listen` finished bootstrapping
/// (or a router driven directly in tests) still gets log output. Repeated
/// calls are no-ops.
pub fn init(config: &Config) {
    INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
        if let Some(dir) = &config.log_directory {
            // Rolls by calendar date: access.log.YYYY-MM-DD
            let appender = tracing_appender::rolling::daily(dir, "access.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = APPENDER_GUARD.set(guard);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
        } else {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    });
}

/// Per-request state shared between the logging layer and the decorator.
///
/// Created by the logging middleware before anything else runs, stashed in
/// the request extensions, and read back when the response is finalized.
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    /// Full original URI (path + query), captured before any rewriting.
    pub uri: Uri,
    client: Option<IpAddr>,
    /// Serialized request body, set by the decorator when non-empty.
    body: OnceLock<String>,
    logged: AtomicBool,
}

impl RequestContext {
    pub fn new(method: Method, uri: Uri, client: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            method,
            uri,
            client: client.map(|addr| addr.ip()),
            body: OnceLock::new(),
            logged: AtomicBool::new(false),
        })
    }

    /// Record the serialized request body for the log line. First write
    /// wins; empty bodies are never recorded.
    pub fn set_body(&self, body: String) {
        if !body.is_empty() {
            let _ = self.body.set(body);
        }
    }

    /// The recorded body snapshot, if any.
    pub fn body_snapshot(&self) -> Option<String> {
        self.body.get().cloned()
    }

    /// Flip the logged flag, returning whether this caller won the
    /// false→true transition. At most one caller ever gets `true`.
    fn mark_logged(&self) -> bool {
        !self.logged.swap(true, Ordering::Relaxed)
    }
}

/// Formats and emits the single per-request log line.
#[derive(Debug, Clone)]
pub struct ResponseLogger {
    app_name: Arc<str>,
    normalize_loopback: bool,
}

impl ResponseLogger {
    pub fn new(config: &Config) -> Self {
        Self {
            app_name: config.app_name.as_str().into(),
            normalize_loopback: config.logging.normalize_loopback,
        }
    }

    /// Emit the completion line for this request, observing the final
    /// status. Idempotent: later calls for the same context are dropped.
    pub fn emit(&self, ctx: &RequestContext, status: StatusCode) {
        if !ctx.mark_logged() {
            return;
        }
        info!(
            app = %self.app_name,
            status = status.as_u16(),
            method = %ctx.method,
            url = %ctx.uri,
            body = ctx.body.get().map(String::as_str).unwrap_or(""),
            client = %self.client_display(ctx.client),
            "request completed"
        );
    }

    /// Arm a guard that reports the request if its future is dropped before
    /// a response was observed (client disconnect, server teardown).
    pub fn disconnect_guard(&self, ctx: Arc<RequestContext>) -> DisconnectGuard {
        DisconnectGuard {
            logger: self.clone(),
            ctx,
        }
    }

    fn client_display(&self, client: Option<IpAddr>) -> String {
        match client {
            Some(ip) if self.normalize_loopback && ip.is_loopback() => "127.0.0.1".to_string(),
            Some(ip) => ip.to_string(),
            None => "-".to_string(),
        }
    }
}

/// Drop guard emitting a best-effort line for requests that never produced
/// a response. Disarmed implicitly once [`ResponseLogger::emit`] has run.
pub struct DisconnectGuard {
    logger: ResponseLogger,
    ctx: Arc<RequestContext>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.ctx.mark_logged() {
            warn!(
                app = %self.logger.app_name,
                method = %self.ctx.method,
                url = %self.ctx.uri,
                client = %self.logger.client_display(self.ctx.client),
                "client disconnected before response"
            );
        }
    }
}
