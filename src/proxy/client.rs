//! Upstream HTTP client seam.
//!
//! # Responsibilities
//! - Send the transformed request to the chosen destination
//! - Stream the upstream response into the context
//! - Classify transport failures into `ForwarderError` kinds
//! - Honor the inbound cancellation token and the configured send timeout

use async_trait::async_trait;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::{Client, Error as ClientError};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::Destination;
use crate::proxy::context::ProxyContext;
use crate::proxy::error::{ForwarderError, ForwarderErrorFeature};

/// Sends one proxied request and reports the outcome.
///
/// Implementations write the response into the context and return the
/// failure discriminant, or `None` on success. They never panic or return a
/// Rust error for transport failures.
#[async_trait]
pub trait ProxyHttpClient: Send + Sync {
    async fn send(
        &self,
        ctx: &mut ProxyContext,
        destination: &Arc<Destination>,
    ) -> Option<ForwarderErrorFeature>;
}

/// Production client on hyper's pooled legacy connector.
pub struct HyperProxyClient {
    client: Client<HttpConnector, Body>,
    /// Upstream send deadline. The forwarding core itself imposes no
    /// timeout; this lives in the client configuration.
    request_timeout: Option<Duration>,
}

impl HyperProxyClient {
    pub fn new(request_timeout: Option<Duration>, connect_timeout: Option<Duration>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(connect_timeout);
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            request_timeout,
        }
    }
}

#[async_trait]
impl ProxyHttpClient for HyperProxyClient {
    async fn send(
        &self,
        ctx: &mut ProxyContext,
        destination: &Arc<Destination>,
    ) -> Option<ForwarderErrorFeature> {
        let mut request = match ctx.request.take() {
            Some(request) => request,
            None => {
                ctx.response = Some(ForwarderError::Request.status().into_response());
                return Some(ForwarderErrorFeature::with_cause(
                    ForwarderError::Request,
                    "request already consumed",
                ));
            }
        };

        if let Err(feature) = ctx.route.transformer.transform(&mut request, &destination.address) {
            ctx.response = Some(feature.error.status().into_response());
            return Some(feature);
        }

        let send = self.client.request(request);
        let outcome = match self.request_timeout {
            Some(timeout) => tokio::select! {
                _ = ctx.aborted.cancelled() => Outcome::Canceled,
                result = tokio::time::timeout(timeout, send) => match result {
                    Err(_) => Outcome::TimedOut,
                    Ok(result) => Outcome::Sent(result),
                },
            },
            None => tokio::select! {
                _ = ctx.aborted.cancelled() => Outcome::Canceled,
                result = send => Outcome::Sent(result),
            },
        };

        match outcome {
            Outcome::Sent(Ok(response)) => {
                let (parts, body) = response.into_parts();
                ctx.response = Some(Response::from_parts(parts, Body::new(body)));
                None
            }
            Outcome::Sent(Err(error)) => {
                let kind = classify(&error);
                ctx.response = Some(kind.status().into_response());
                Some(ForwarderErrorFeature::with_cause(kind, error))
            }
            Outcome::TimedOut => {
                let kind = ForwarderError::RequestTimedOut;
                ctx.response = Some(kind.status().into_response());
                Some(ForwarderErrorFeature::new(kind))
            }
            Outcome::Canceled => {
                let kind = ForwarderError::RequestCanceled;
                ctx.response = Some(kind.status().into_response());
                Some(ForwarderErrorFeature::new(kind))
            }
        }
    }
}

enum Outcome {
    Sent(Result<hyper::Response<hyper::body::Incoming>, ClientError>),
    TimedOut,
    Canceled,
}

/// Map a transport error onto the forwarder taxonomy.
fn classify(error: &ClientError) -> ForwarderError {
    if error.is_connect() {
        return ForwarderError::Request;
    }
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        if let Some(hyper_error) = inner.downcast_ref::<hyper::Error>() {
            if hyper_error.is_timeout() {
                return ForwarderError::RequestTimedOut;
            }
            if hyper_error.is_body_write_aborted() {
                return ForwarderError::RequestBodyDestination;
            }
            if hyper_error.is_incomplete_message() {
                return ForwarderError::ResponseBodyDestination;
            }
            return ForwarderError::Request;
        }
        source = inner.source();
    }
    ForwarderError::Request
}
