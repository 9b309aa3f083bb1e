#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! # microkit
//!
//! Cross-cutting request handling for axum services: private-route
//! authorization backed by an encrypted API-key file, exactly-once response
//! logging, and optional HTTPS enforcement with redirect.
//!
//! ```no_run
//! use microkit::{Config, RouteOptions, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), microkit::Error> {
//!     let config = Config::load(None)?;
//!     Server::new(config)
//!         .get("/ping", RouteOptions::default(), || async { "pong" })
//!         .post("/data", RouteOptions::private(), || async { "ok" })
//!         .listen(3000)
//!         .await
//! }
//! ```
//!
//! Modules:
//! - `config` — TOML + environment configuration
//! - `crypto` — passphrase cipher behind the key store and `keytool`
//! - `keystore` — lazily-decrypted, cached key set
//! - `auth` — allow/deny verdicts and the fixed denial response
//! - `transport` — HTTPS enforcement and TLS material loading
//! - `logging` — exactly-once request completion logging
//! - `server` — route registration and the decorator pipeline

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod logging;
pub mod server;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use auth::{Authorizer, Verdict, DENIAL_MESSAGE};
pub use config::{Config, LoggingConfig, TransportConfig};
pub use error::Error;
pub use keystore::KeyStore;
pub use server::{Method, RouteOptions, Server};
