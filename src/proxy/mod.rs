//! Request forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (http layer)
//!     → context.rs (ProxyContext: cluster, candidates, request, abort token)
//!     → forwarder.rs (select destination, track concurrency, send)
//!     → client.rs (upstream HTTP send, error classification)
//!     → context carries response or a discriminated ForwarderError
//!     → passive evaluator reads the outcome after the forwarder returns
//! ```
//!
//! # Design Decisions
//! - Transport failures are values on the context, never Rust errors;
//!   only pipeline invariant violations surface as Err
//! - Concurrency counters pair inc/dec through an RAII guard
//! - The HTTP client is a trait seam so tests can script outcomes

pub mod client;
pub mod context;
pub mod error;
pub mod forwarder;

pub use client::{HyperProxyClient, ProxyHttpClient};
pub use context::{ProxyContext, RequestTransformer, RouteHandle, UriRewriteTransformer};
pub use error::{ForwarderError, ForwarderErrorFeature, PipelineError};
pub use forwarder::Forwarder;
