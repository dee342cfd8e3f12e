//! Passive health checking (transport failure rate).
//!
//! # Responsibilities
//! - Classify each forwarded request's outcome
//! - Update the destination's sliding failure window
//! - Ask for a verdict once the observed rate crosses the limit
//!
//! # Design Decisions
//! - Client cancellations are ambiguous and never count as failures
//! - The rate limit can be overridden per cluster through metadata
//! - A destination must stay out at least one full detection window, so
//!   stale failure history ages out before it returns

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{Cluster, Destination, Health};
use crate::health::updater::HealthUpdater;
use crate::health::HealthVerdict;
use crate::proxy::context::ProxyContext;
use crate::runtime::Clock;

/// Cluster metadata key overriding the failure rate limit, a decimal in [0, 1].
pub const TRANSPORT_FAILURE_RATE_LIMIT_KEY: &str = "TransportFailureRateHealthPolicy.RateLimit";

/// Process-wide defaults for the transport failure rate policy.
#[derive(Debug, Clone)]
pub struct PassiveHealthOptions {
    /// Sliding span over which the failure rate is computed.
    pub detection_window: Duration,
    /// Minimum requests in the window before any verdict is made.
    pub minimal_total_count_threshold: u64,
    /// Failure rate at or above which a destination is unhealthy.
    pub default_rate_limit: f64,
    /// Exclusion period for destinations marked unhealthy.
    pub default_reactivation_period: Duration,
}

impl Default for PassiveHealthOptions {
    fn default() -> Self {
        Self {
            detection_window: Duration::from_secs(60),
            minimal_total_count_threshold: 10,
            default_rate_limit: 0.3,
            default_reactivation_period: Duration::from_secs(60),
        }
    }
}

/// Evaluates destination health from real traffic outcomes.
pub struct PassiveEvaluator {
    clock: Arc<dyn Clock>,
    updater: Arc<HealthUpdater>,
    options: PassiveHealthOptions,
}

impl PassiveEvaluator {
    /// Policy name used for registry lookups and logging.
    pub const NAME: &'static str = "TransportFailureRate";

    pub fn new(clock: Arc<dyn Clock>, updater: Arc<HealthUpdater>, options: PassiveHealthOptions) -> Self {
        Self {
            clock,
            updater,
            options,
        }
    }

    /// Observe one completed forwarded request.
    ///
    /// Called by the pipeline after the forwarder returns, with the
    /// destination recorded in the context.
    pub fn request_proxied(&self, ctx: &ProxyContext, cluster: &Arc<Cluster>, destination: &Arc<Destination>) {
        if !cluster.passive.enabled {
            return;
        }

        let failed = self.is_destination_failure(ctx);

        let rate = {
            let mut window = destination.window.lock().unwrap();
            window.add_new(
                self.clock.now_ticks(),
                self.clock.frequency(),
                failed,
                self.options.detection_window,
                self.options.minimal_total_count_threshold,
            )
        };

        let limit = cluster
            .metadata_f64(TRANSPORT_FAILURE_RATE_LIMIT_KEY)
            .filter(|limit| (0.0..=1.0).contains(limit))
            .unwrap_or(self.options.default_rate_limit);

        let health = if rate >= limit { Health::Unhealthy } else { Health::Healthy };
        if health == Health::Unhealthy {
            tracing::debug!(
                cluster = %cluster.cluster_id,
                destination = %destination.destination_id,
                rate,
                limit,
                "Transport failure rate crossed the limit"
            );
        }

        let verdict = HealthVerdict {
            health,
            reactivation_period: self.reactivation_period(cluster),
        };
        self.updater.set_passive(cluster, destination, verdict);
    }

    /// Whether this outcome counts against the destination.
    fn is_destination_failure(&self, ctx: &ProxyContext) -> bool {
        let Some(kind) = ctx.error_kind() else {
            return false;
        };
        // The inbound client went away; the destination gets no blame.
        if ctx.aborted.is_cancelled() {
            return false;
        }
        kind.is_destination_failure()
    }

    /// The destination must not return before its failure history has aged
    /// out of the detection window.
    fn reactivation_period(&self, cluster: &Arc<Cluster>) -> Duration {
        cluster
            .passive
            .reactivation_period
            .unwrap_or(self.options.default_reactivation_period)
            .max(self.options.detection_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::context::RouteHandle;
    use crate::proxy::error::{ForwarderError, ForwarderErrorFeature};
    use crate::runtime::clock::ManualClock;
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;

    fn make_pair(metadata: HashMap<String, String>) -> (Arc<Cluster>, Arc<Destination>) {
        let destination = Arc::new(Destination::new("d1", "http://127.0.0.1:9001".parse().unwrap()));
        let cluster = Arc::new(Cluster::new(
            "c1",
            vec![destination.clone()],
            Default::default(),
            Default::default(),
            metadata,
        ));
        (cluster, destination)
    }

    fn make_evaluator(clock: Arc<ManualClock>, options: PassiveHealthOptions) -> PassiveEvaluator {
        PassiveEvaluator::new(clock, Arc::new(HealthUpdater::new()), options)
    }

    fn ctx_with(cluster: &Arc<Cluster>, error: Option<ForwarderError>) -> ProxyContext {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let mut ctx = ProxyContext::new(cluster.clone(), RouteHandle::new("r1"), request);
        if let Some(kind) = error {
            ctx.set_error(ForwarderErrorFeature::new(kind));
        }
        ctx
    }

    fn tight_options() -> PassiveHealthOptions {
        PassiveHealthOptions {
            detection_window: Duration::from_secs(10),
            minimal_total_count_threshold: 10,
            default_rate_limit: 0.5,
            default_reactivation_period: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_rate_trips_at_limit() {
        let clock = Arc::new(ManualClock::new());
        let (cluster, destination) = make_pair(HashMap::new());
        let evaluator = make_evaluator(clock.clone(), tight_options());

        // Five successes then six failures inside one second.
        for _ in 0..5 {
            evaluator.request_proxied(&ctx_with(&cluster, None), &cluster, &destination);
            clock.advance(Duration::from_millis(10));
        }
        for i in 0..6 {
            evaluator.request_proxied(
                &ctx_with(&cluster, Some(ForwarderError::Request)),
                &cluster,
                &destination,
            );
            if i < 4 {
                // Below the evidence threshold the rate reads 0.0.
                assert_eq!(destination.health(), Health::Healthy, "no verdict before the boundary");
            }
            clock.advance(Duration::from_millis(10));
        }

        // 6 failed of 11 total, 0.545 at or above the 0.5 limit.
        assert_eq!(destination.health(), Health::Unhealthy);
    }

    #[tokio::test]
    async fn test_window_empties_and_restarts() {
        let clock = Arc::new(ManualClock::new());
        let (cluster, destination) = make_pair(HashMap::new());
        let evaluator = make_evaluator(clock.clone(), tight_options());

        for _ in 0..11 {
            evaluator.request_proxied(
                &ctx_with(&cluster, Some(ForwarderError::Request)),
                &cluster,
                &destination,
            );
        }
        assert_eq!(destination.health(), Health::Unhealthy);

        // After the window has aged out, the next observation starts fresh.
        clock.advance(Duration::from_secs(30));
        evaluator.request_proxied(&ctx_with(&cluster, None), &cluster, &destination);
        assert_eq!(destination.health(), Health::Healthy);
        let window = destination.window.lock().unwrap();
        assert_eq!(window.total(), 1);
        assert_eq!(window.failed(), 0);
    }

    #[tokio::test]
    async fn test_no_verdict_below_minimum_count() {
        let clock = Arc::new(ManualClock::new());
        let (cluster, destination) = make_pair(HashMap::new());
        let evaluator = make_evaluator(clock.clone(), tight_options());

        for _ in 0..9 {
            evaluator.request_proxied(
                &ctx_with(&cluster, Some(ForwarderError::Request)),
                &cluster,
                &destination,
            );
        }
        assert_eq!(destination.health(), Health::Healthy, "all failures but not enough evidence");
    }

    #[tokio::test]
    async fn test_cancellation_not_a_failure() {
        let clock = Arc::new(ManualClock::new());
        let (cluster, destination) = make_pair(HashMap::new());
        let evaluator = make_evaluator(clock.clone(), tight_options());

        for _ in 0..20 {
            let ctx = ctx_with(&cluster, Some(ForwarderError::RequestCanceled));
            evaluator.request_proxied(&ctx, &cluster, &destination);
        }
        assert_eq!(destination.health(), Health::Healthy);
        assert_eq!(destination.window.lock().unwrap().failed(), 0);
    }

    #[tokio::test]
    async fn test_aborted_token_discounts_any_error() {
        let clock = Arc::new(ManualClock::new());
        let (cluster, destination) = make_pair(HashMap::new());
        let evaluator = make_evaluator(clock.clone(), tight_options());

        for _ in 0..20 {
            // A timeout recorded after the client disconnected is attributed
            // to the client, not the destination.
            let ctx = ctx_with(&cluster, Some(ForwarderError::RequestTimedOut));
            ctx.aborted.cancel();
            evaluator.request_proxied(&ctx, &cluster, &destination);
        }
        assert_eq!(destination.health(), Health::Healthy);
        assert_eq!(destination.window.lock().unwrap().failed(), 0);
    }

    #[tokio::test]
    async fn test_metadata_rate_limit_override() {
        let clock = Arc::new(ManualClock::new());
        let mut metadata = HashMap::new();
        metadata.insert(TRANSPORT_FAILURE_RATE_LIMIT_KEY.to_string(), "0.9".to_string());
        let (cluster, destination) = make_pair(metadata);
        let evaluator = make_evaluator(clock.clone(), tight_options());

        // 6/11 ≈ 0.545 stays below the per-cluster 0.9 limit.
        for _ in 0..5 {
            evaluator.request_proxied(&ctx_with(&cluster, None), &cluster, &destination);
        }
        for _ in 0..6 {
            evaluator.request_proxied(
                &ctx_with(&cluster, Some(ForwarderError::Request)),
                &cluster,
                &destination,
            );
        }
        assert_eq!(destination.health(), Health::Healthy);
    }

    #[tokio::test]
    async fn test_disabled_passive_records_nothing() {
        let clock = Arc::new(ManualClock::new());
        let destination = Arc::new(Destination::new("d1", "http://127.0.0.1:9001".parse().unwrap()));
        let cluster = Arc::new(Cluster::new(
            "c1",
            vec![destination.clone()],
            Default::default(),
            crate::cluster::PassiveHealthSettings {
                enabled: false,
                reactivation_period: None,
            },
            HashMap::new(),
        ));
        let evaluator = make_evaluator(clock, tight_options());

        evaluator.request_proxied(
            &ctx_with(&cluster, Some(ForwarderError::Request)),
            &cluster,
            &destination,
        );
        assert_eq!(destination.window.lock().unwrap().total(), 0);
        assert_eq!(destination.health(), Health::Unknown);
    }

    #[tokio::test]
    async fn test_reactivation_covers_detection_window() {
        let clock = Arc::new(ManualClock::new());
        let (cluster, _destination) = make_pair(HashMap::new());
        let options = PassiveHealthOptions {
            detection_window: Duration::from_secs(60),
            default_reactivation_period: Duration::from_secs(30),
            ..tight_options()
        };
        let evaluator = make_evaluator(clock, options);

        assert_eq!(evaluator.reactivation_period(&cluster), Duration::from_secs(60));
    }
}
