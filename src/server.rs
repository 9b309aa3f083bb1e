//! Server assembly and the per-request decorator pipeline.
//!
//! Every registered handler is wrapped so that each inbound request walks an
//! explicit short-circuit pipeline before (possibly) reaching it:
//!
//! ```text
//! Start → TransportCheck → (Redirected: terminal)
//!       → AuthCheck      → (Denied: terminal)        [private routes only]
//!       → handler invoked exactly once
//!       → ResponseSent   → one log line with the final status
//! ```
//!
//! Each stage produces a typed [`Gate`] decision; terminal stages write their
//! response and stop — the handler is never invoked behind a redirect or a
//! denial. The response logger is the outermost layer, so every terminal
//! path flows through a single emission point observing the final status,
//! whether the handler responded synchronously or after suspending on I/O.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter};
use axum::{Extension, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{self, Authorizer, Verdict};
use crate::config::Config;
use crate::error::Error;
use crate::keystore::KeyStore;
use crate::logging::{self, RequestContext, ResponseLogger};
use crate::transport::{self, Scheme, TransportGuard};

/// Largest request body the pipeline will buffer for credential checks and
/// logging. Bodies declaring a larger `Content-Length` stream to the handler
/// untouched (no body snapshot, no body credential); an undeclared stream
/// that runs past the cap is rejected with 413.
const BODY_CAP: usize = 1024 * 1024;

/// Per-registration options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteOptions {
    /// Require a matching API key before the handler runs.
    pub private: bool,
    /// Static-asset minification hint for embedding applications. Carried
    /// through registration, not interpreted by the pipeline.
    pub minify: bool,
}

impl RouteOptions {
    /// Options for a credential-gated route.
    pub fn private() -> Self {
        Self {
            private: true,
            minify: false,
        }
    }
}

/// HTTP methods accepted by [`Server::route`]. Mounting sub-routers (the
/// catch-all "use" registration) goes through [`Server::mount`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    fn filter(self) -> MethodFilter {
        match self {
            Self::Get => MethodFilter::GET,
            Self::Post => MethodFilter::POST,
            Self::Put => MethodFilter::PUT,
            Self::Delete => MethodFilter::DELETE,
            Self::Patch => MethodFilter::PATCH,
        }
    }
}

/// Typed decision of a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Gate {
    /// Hand the request to the next stage.
    Continue,
    /// Terminal: answer with a GET-style redirect to this URL.
    Redirect(String),
    /// Terminal: answer with the fixed 403 denial body.
    Deny,
}

/// Shared pipeline state, cloned into every middleware invocation.
#[derive(Clone)]
struct PipelineState {
    config: Arc<Config>,
    authorizer: Arc<Authorizer>,
    guard: TransportGuard,
    logger: ResponseLogger,
}

impl PipelineState {
    fn transport_gate(&self, secure: bool, host: Option<&str>, uri: &Uri) -> Gate {
        match self.guard.requires_redirect(secure, host, uri) {
            Some(target) => Gate::Redirect(target),
            None => Gate::Continue,
        }
    }

    async fn auth_gate(&self, header: Option<&str>, body: Option<&str>) -> Gate {
        match self.authorizer.authorize(header, body).await {
            Verdict::Allowed => Gate::Continue,
            // Wire-identical: which of the two it was stays server-side
            Verdict::Denied | Verdict::Misconfigured => Gate::Deny,
        }
    }
}

/// A configured server with its registered routes.
///
/// Registrations are append-only; [`Server::listen`] consumes the server, so
/// nothing can be registered or reconfigured once the socket is bound.
pub struct Server {
    config: Arc<Config>,
    state: PipelineState,
    router: Router,
    has_private: bool,
}

impl Server {
    /// Create a server from a configuration snapshot.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let authorizer = Arc::new(Authorizer::new(KeyStore::new(config.key_file.clone())));
        let state = PipelineState {
            config: config.clone(),
            authorizer,
            guard: TransportGuard::new(config.transport.as_ref()),
            logger: ResponseLogger::new(&config),
        };
        Self {
            config,
            state,
            router: Router::new(),
            has_private: false,
        }
    }

    /// Register a handler for `method` on `path`.
    ///
    /// The handler is passed through to the router unmodified — the pipeline
    /// wraps it but never changes its argument shape. Private routes get the
    /// authorization stage attached here, so public routes never pay for it.
    pub fn route<H, T>(mut self, method: Method, path: &str, options: RouteOptions, handler: H) -> Self
    where
        H: axum::handler::Handler<T, ()>,
        T: 'static,
    {
        let mut method_router = on(method.filter(), handler);
        if options.private {
            self.has_private = true;
            method_router = method_router.layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_authorization,
            ));
        }
        self.router = self.router.route(path, method_router);
        self
    }

    /// `GET` registration.
    pub fn get<H, T>(self, path: &str, options: RouteOptions, handler: H) -> Self
    where
        H: axum::handler::Handler<T, ()>,
        T: 'static,
    {
        self.route(Method::Get, path, options, handler)
    }

    /// `POST` registration.
    pub fn post<H, T>(self, path: &str, options: RouteOptions, handler: H) -> Self
    where
        H: axum::handler::Handler<T, ()>,
        T: 'static,
    {
        self.route(Method::Post, path, options, handler)
    }

    /// `PUT` registration.
    pub fn put<H, T>(self, path: &str, options: RouteOptions, handler: H) -> Self
    where
        H: axum::handler::Handler<T, ()>,
        T: 'static,
    {
        self.route(Method::Put, path, options, handler)
    }

    /// `DELETE` registration.
    pub fn delete<H, T>(self, path: &str, options: RouteOptions, handler: H) -> Self
    where
        H: axum::handler::Handler<T, ()>,
        T: 'static,
    {
        self.route(Method::Delete, path, options, handler)
    }

    /// `PATCH` registration.
    pub fn patch<H, T>(self, path: &str, options: RouteOptions, handler: H) -> Self
    where
        H: axum::handler::Handler<T, ()>,
        T: 'static,
    {
        self.route(Method::Patch, path, options, handler)
    }

    /// Mount a sub-router under `path` — the catch-all "use" registration.
    /// With `private` options the whole subtree is credential-gated.
    pub fn mount(mut self, path: &str, options: RouteOptions, sub: Router) -> Self {
        let sub = if options.private {
            self.has_private = true;
            sub.layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_authorization,
            ))
        } else {
            sub
        };
        self.router = self.router.nest(path, sub);
        self
    }

    /// Finalize the router for one listener. The layer order matters:
    /// `Extension(scheme)` must be outermost (it tags the inbound channel),
    /// then logging (so it observes every terminal path), then transport.
    fn pipeline(&self, scheme: Scheme) -> Router {
        self.router
            .clone()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                enforce_transport,
            ))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                log_completion,
            ))
            .layer(Extension(scheme))
    }

    /// The fully decorated router, for embedding or driving in tests. Uses
    /// the scheme the configuration would serve with: HTTPS when TLS
    /// material is configured, plain HTTP otherwise.
    pub fn router(&self) -> Router {
        let scheme = if self.tls_paths().is_ok_and(|paths| paths.is_some()) {
            Scheme::Https
        } else {
            Scheme::Http
        };
        self.pipeline(scheme)
    }

    /// Decryption-attempt counter of the backing key store, for
    /// instrumentation and tests.
    pub fn key_decrypt_count(&self) -> u64 {
        self.state.authorizer.decrypt_count()
    }

    /// TLS material from the configuration: both paths, neither, or a
    /// configuration error when only one is present.
    fn tls_paths(&self) -> Result<Option<(std::path::PathBuf, std::path::PathBuf)>, Error> {
        match self.config.transport.as_ref() {
            Some(t) => match (&t.cert, &t.key) {
                (Some(cert), Some(key)) => Ok(Some((cert.clone(), key.clone()))),
                (None, None) => Ok(None),
                _ => Err(Error::Config(
                    "transport requires both cert and key, or neither".to_string(),
                )),
            },
            None => Ok(None),
        }
    }

    /// Bind `port` and serve until SIGINT/SIGTERM.
    ///
    /// With `[transport]` configured this terminates TLS, failing fast when
    /// the certificate or key is unreadable; with `force_secure` and
    /// `redirect_from` it additionally answers plain HTTP on that port with
    /// redirects through the normal pipeline (so they are logged like any
    /// other request).
    pub async fn listen(self, port: u16) -> Result<(), Error> {
        logging::init(&self.config);
        info!(
            app = %self.config.app_name,
            version = env!("CARGO_PKG_VERSION"),
            "microkit starting"
        );
        if self.has_private && !self.state.authorizer.is_configured() {
            warn!(
                "private routes registered but no key file/passphrase configured — \
                 all private requests will be denied"
            );
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let transport_config = self.config.transport.clone();
        match self.tls_paths()? {
            Some((cert, key)) => {
                let rustls = transport::load_tls_config(&cert, &key).await?;
                let transport_config =
                    transport_config.expect("tls_paths is Some only with a transport section");

                // Redirect listener shares the registered routes, tagged as
                // the insecure channel so the guard fires.
                let redirect_task = match (
                    transport_config.force_secure,
                    transport_config.redirect_from,
                ) {
                    (true, Some(http_port)) => {
                        let app = self.pipeline(Scheme::Http);
                        let http_addr = SocketAddr::from(([0, 0, 0, 0], http_port));
                        let listener = TcpListener::bind(http_addr).await.map_err(|e| {
                            Error::Bind {
                                addr: http_addr.to_string(),
                                source: e,
                            }
                        })?;
                        info!(address = %http_addr, "redirect listener bound");
                        Some(tokio::spawn(async move {
                            let service =
                                app.into_make_service_with_connect_info::<SocketAddr>();
                            if let Err(e) = axum::serve(listener, service).await {
                                warn!(error = %e, "redirect listener stopped");
                            }
                        }))
                    }
                    _ => None,
                };

                let app = self.pipeline(Scheme::Https);
                let handle = axum_server::Handle::new();
                let shutdown_handle = handle.clone();
                tokio::spawn(async move {
                    shutdown_signal().await;
                    shutdown_handle.graceful_shutdown(None);
                });

                info!(address = %addr, "listening (https)");
                let result = axum_server::bind_rustls(addr, rustls)
                    .handle(handle)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
                    .map_err(Error::Serve);

                if let Some(task) = redirect_task {
                    task.abort();
                }
                result
            }
            // No TLS material: plain HTTP. `force_secure` still applies via
            // `x-forwarded-proto` from a fronting proxy.
            None => {
                let app = self.pipeline(Scheme::Http);
                let listener = TcpListener::bind(addr).await.map_err(|e| Error::Bind {
                    addr: addr.to_string(),
                    source: e,
                })?;
                info!(address = %addr, "listening (http)");
                axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(Error::Serve)
            }
        }
    }
}

/// Outermost middleware: owns the [`RequestContext`] and the exactly-once
/// log emission observing the final status.
async fn log_completion(State(state): State<PipelineState>, req: Request, next: Next) -> Response {
    // A request arriving before `listen` bootstrapped (or a router driven
    // directly) initializes logging here, once.
    logging::init(&state.config);

    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let ctx = RequestContext::new(req.method().clone(), req.uri().clone(), client);

    // Buffer the body once: the snapshot feeds both the log line and the
    // body-credential check; the handler receives the identical bytes. A
    // body declaring more than the cap is streamed to the handler untouched
    // rather than buffered, so large uploads are never truncated.
    let (mut parts, body) = req.into_parts();
    let declared_len = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    parts.extensions.insert(ctx.clone());
    let req = if declared_len.is_some_and(|len| len > BODY_CAP as u64) {
        Request::from_parts(parts, body)
    } else {
        match axum::body::to_bytes(body, BODY_CAP).await {
            Ok(bytes) => {
                ctx.set_body(String::from_utf8_lossy(&bytes).into_owned());
                Request::from_parts(parts, Body::from(bytes))
            }
            // The stream either ran past the cap without declaring a length
            // or the client gave up mid-body. The original bytes are gone,
            // so the handler cannot run; answer 413 and log it as the final
            // status.
            Err(_) => {
                let response = StatusCode::PAYLOAD_TOO_LARGE.into_response();
                state.logger.emit(&ctx, response.status());
                return response;
            }
        }
    };

    let guard = state.logger.disconnect_guard(ctx.clone());
    let response = next.run(req).await;
    state.logger.emit(&ctx, response.status());
    drop(guard);
    response
}

/// Transport stage: redirect insecure requests when the guard is active.
async fn enforce_transport(State(state): State<PipelineState>, req: Request, next: Next) -> Response {
    let scheme = req
        .extensions()
        .get::<Scheme>()
        .copied()
        .unwrap_or(Scheme::Http);
    let forwarded = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok());

    let secure = TransportGuard::is_secure(scheme, forwarded);
    match state.transport_gate(secure, host, req.uri()) {
        Gate::Redirect(target) => (
            StatusCode::MOVED_PERMANENTLY,
            [(header::LOCATION, target)],
        )
            .into_response(),
        _ => next.run(req).await,
    }
}

/// Authorization stage, attached only to private registrations. The header
/// credential is the raw `Authorization` value; the body credential comes
/// from the snapshot buffered by [`log_completion`].
async fn require_authorization(
    State(state): State<PipelineState>,
    req: Request,
    next: Next,
) -> Response {
    let header_credential = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body_credential = req
        .extensions()
        .get::<Arc<RequestContext>>()
        .and_then(|ctx| ctx.body_snapshot())
        .and_then(|body| auth::body_credential(&body));

    match state
        .auth_gate(header_credential.as_deref(), body_credential.as_deref())
        .await
    {
        Gate::Continue => next.run(req).await,
        _ => auth::denial_response(),
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
