//! Per-request proxy context.
//!
//! # Responsibilities
//! - Carry the cluster handle, candidate set, and route through the pipeline
//! - Record the chosen destination for downstream observers
//! - Hold the proxied response or the discriminated failure reason

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme, Uri};
use axum::http::Request;
use axum::response::Response;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cluster::{Cluster, Destination};
use crate::proxy::error::{ForwarderError, ForwarderErrorFeature};

/// Rewrites the inbound request for a chosen destination.
pub trait RequestTransformer: Send + Sync {
    fn transform(&self, request: &mut Request<Body>, target: &Uri) -> Result<(), ForwarderErrorFeature>;
}

/// The matched route as seen by the forwarding stage.
#[derive(Clone)]
pub struct RouteHandle {
    pub route_id: String,
    pub transformer: Arc<dyn RequestTransformer>,
}

impl RouteHandle {
    pub fn new(route_id: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            transformer: Arc::new(UriRewriteTransformer),
        }
    }

    pub fn with_transformer(route_id: impl Into<String>, transformer: Arc<dyn RequestTransformer>) -> Self {
        Self {
            route_id: route_id.into(),
            transformer,
        }
    }
}

/// Default transformer: retarget the request URI at the destination while
/// preserving the inbound path and query.
pub struct UriRewriteTransformer;

impl RequestTransformer for UriRewriteTransformer {
    fn transform(&self, request: &mut Request<Body>, target: &Uri) -> Result<(), ForwarderErrorFeature> {
        let mut parts = request.uri().clone().into_parts();
        parts.scheme = Some(target.scheme().cloned().unwrap_or(Scheme::HTTP));

        let authority = target
            .authority()
            .cloned()
            .or_else(|| Authority::from_maybe_shared(target.to_string()).ok())
            .ok_or_else(|| {
                ForwarderErrorFeature::with_cause(
                    ForwarderError::Request,
                    format!("destination address has no authority: {}", target),
                )
            })?;
        parts.authority = Some(authority);

        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }

        let uri = Uri::from_parts(parts).map_err(|e| {
            ForwarderErrorFeature::with_cause(ForwarderError::Request, format!("uri rewrite failed: {}", e))
        })?;
        *request.uri_mut() = uri;
        Ok(())
    }
}

/// State attached to one inbound request as it crosses the forwarding stage.
pub struct ProxyContext {
    /// The cluster this request resolved to.
    pub cluster: Arc<Cluster>,
    /// The matched route.
    pub route: RouteHandle,
    /// The inbound request; taken by the HTTP client on send.
    pub request: Option<Request<Body>>,
    /// The proxied response, written by the HTTP client.
    pub response: Option<Response>,
    /// Candidates that survived upstream filtering. `None` means the
    /// upstream pipeline never ran, which is a fatal invariant violation.
    pub available_destinations: Option<Vec<Arc<Destination>>>,
    /// The destination the forwarder chose, observable downstream.
    pub proxied_destination: Option<Arc<Destination>>,
    /// Failure outcome, absent on success.
    pub error: Option<ForwarderErrorFeature>,
    /// Fires when the inbound client goes away.
    pub aborted: CancellationToken,
}

impl ProxyContext {
    pub fn new(cluster: Arc<Cluster>, route: RouteHandle, request: Request<Body>) -> Self {
        Self {
            cluster,
            route,
            request: Some(request),
            response: None,
            available_destinations: None,
            proxied_destination: None,
            error: None,
            aborted: CancellationToken::new(),
        }
    }

    /// The failure discriminant, if any.
    pub fn error_kind(&self) -> Option<ForwarderError> {
        self.error.as_ref().map(|feature| feature.error)
    }

    pub fn set_error(&mut self, feature: ForwarderErrorFeature) {
        self.error = Some(feature);
    }
}
