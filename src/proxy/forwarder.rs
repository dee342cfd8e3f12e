//! Terminal forwarding stage.
//!
//! # Responsibilities
//! - Choose one destination from the pre-filtered candidate set
//! - Track cluster/destination concurrency for the request's lifetime
//! - Invoke the HTTP client and record the outcome on the context
//!
//! # Design Decisions
//! - An absent candidate list is a fatal pipeline error, an empty one is 503
//! - Several surviving candidates is a configuration smell: pick randomly,
//!   warn, but never fail the request
//! - Outcome classification is left to the passive evaluator; the hot path
//!   only records

use std::sync::Arc;
use tracing::Instrument;

use axum::response::IntoResponse;

use crate::cluster::{ConcurrencyGuard, Destination};
use crate::proxy::client::ProxyHttpClient;
use crate::proxy::context::ProxyContext;
use crate::proxy::error::{ForwarderError, ForwarderErrorFeature, PipelineError};
use crate::runtime::RandomFactory;

/// The terminal request handler of the proxy pipeline.
pub struct Forwarder {
    client: Arc<dyn ProxyHttpClient>,
    random: Arc<dyn RandomFactory>,
}

impl Forwarder {
    pub fn new(client: Arc<dyn ProxyHttpClient>, random: Arc<dyn RandomFactory>) -> Self {
        Self { client, random }
    }

    /// Forward the request described by `ctx`.
    ///
    /// Writes the proxied response (or an error response) into the context;
    /// transport failures are recorded as the context's error feature.
    /// Returns `Err` only for pipeline invariant violations.
    pub async fn forward(&self, ctx: &mut ProxyContext) -> Result<(), PipelineError> {
        let span = tracing::info_span!(
            "proxy_forward",
            proxy.route_id = %ctx.route.route_id,
            proxy.cluster_id = %ctx.cluster.cluster_id,
            proxy.destination_id = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        );
        self.forward_inner(ctx).instrument(span).await
    }

    async fn forward_inner(&self, ctx: &mut ProxyContext) -> Result<(), PipelineError> {
        let chosen = {
            let candidates = ctx
                .available_destinations
                .as_ref()
                .ok_or(PipelineError::MissingDestinations)?;

            if candidates.is_empty() {
                tracing::warn!(
                    cluster = %ctx.cluster.cluster_id,
                    "No available destinations after load balancing"
                );
                let kind = ForwarderError::NoAvailableDestinations;
                ctx.response = Some(kind.status().into_response());
                ctx.set_error(ForwarderErrorFeature::new(kind));
                tracing::Span::current().record("otel.status_code", "ERROR");
                return Ok(());
            }

            self.choose(ctx, candidates)
        };

        tracing::Span::current().record("proxy.destination_id", chosen.destination_id.as_str());
        ctx.proxied_destination = Some(chosen.clone());

        // Held across the send so the gauges drop on every exit path.
        let _guard = ConcurrencyGuard::acquire(&ctx.cluster, &chosen);

        if let Some(feature) = self.client.send(ctx, &chosen).await {
            ctx.set_error(feature);
        }

        let status = if ctx.error.is_none() { "OK" } else { "ERROR" };
        tracing::Span::current().record("otel.status_code", status);
        Ok(())
    }

    fn choose(&self, ctx: &ProxyContext, candidates: &[Arc<Destination>]) -> Arc<Destination> {
        if candidates.len() == 1 {
            return candidates[0].clone();
        }
        tracing::warn!(
            cluster = %ctx.cluster.cluster_id,
            count = candidates.len(),
            "More than one destination available, choosing randomly"
        );
        let index = {
            let mut random = self.random.create();
            random.next_index(candidates.len())
        };
        candidates[index].clone()
    }
}
