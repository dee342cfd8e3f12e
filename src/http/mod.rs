//! HTTP ingress subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, proxy handler)
//!     → request.rs (request ID injection)
//!     → routing layer decides the cluster
//!     → candidate set built from destination health
//!     → proxy::Forwarder sends upstream
//!     → health::PassiveEvaluator observes the outcome
//!     → response returned to the client
//! ```

pub mod request;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::HttpServer;
