//! # Trust Core Server
//!
//! Wires the shared store, token service, and permission engine into one
//! [`TrustCore`] and exposes key publication and health over HTTP.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /.well-known/jwks.json` | public signing keys |
//! | `GET /health` | store state and counters; 503 when the breaker is open |

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The composition root.
pub mod app;
/// Server configuration.
pub mod config;
/// Startup errors.
pub mod error;
/// HTTP routes.
pub mod http;

pub use app::TrustCore;
pub use config::ServerConfig;
pub use error::InitError;
pub use http::{HealthReport, build_router};
