//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the proxy handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Assemble the forwarding core and both health check paths
//! - Run the initial probe pass before accepting traffic

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::cluster::ClusterRegistry;
use crate::config::ProxyConfig;
use crate::health::active::{ActiveHealthOptions, HyperProbeTransport, PolicyRegistry};
use crate::health::{
    ActiveHealthCheckMonitor, ActiveProber, ConsecutiveFailuresPolicy, EntityScheduler,
    HealthUpdater, PassiveEvaluator, PassiveHealthOptions,
};
use crate::http::request::{RequestIdExt, RequestIdLayer};
use crate::observability::metrics;
use crate::proxy::{Forwarder, HyperProxyClient, ProxyContext, RouteHandle};
use crate::routing::Router as ProxyRouter;
use crate::runtime::{MonotonicClock, ThreadRandomFactory};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
    pub registry: Arc<ClusterRegistry>,
    pub forwarder: Arc<Forwarder>,
    pub passive: Arc<PassiveEvaluator>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    monitor: Arc<ActiveHealthCheckMonitor>,
}

impl HttpServer {
    /// Assemble the server and the health-check plumbing from config.
    pub fn new(config: ProxyConfig) -> Self {
        let registry = Arc::new(ClusterRegistry::from_config(&config));
        let updater = Arc::new(HealthUpdater::new());
        let clock = Arc::new(MonotonicClock::new());

        let passive_cfg = &config.health_check.passive;
        let passive = Arc::new(PassiveEvaluator::new(
            clock,
            updater.clone(),
            PassiveHealthOptions {
                detection_window: Duration::from_secs(passive_cfg.detection_window_secs),
                minimal_total_count_threshold: passive_cfg.minimal_total_count_threshold,
                default_rate_limit: passive_cfg.rate_limit,
                default_reactivation_period: Duration::from_secs(passive_cfg.reactivation_period_secs),
            },
        ));

        let active_cfg = &config.health_check.active;
        let active_options = ActiveHealthOptions {
            default_interval: Duration::from_secs(active_cfg.interval_secs),
            default_timeout: Duration::from_secs(active_cfg.timeout_secs),
            default_path: active_cfg.path.clone(),
            default_policy: active_cfg.policy.clone(),
            default_reactivation_period: Duration::from_secs(passive_cfg.reactivation_period_secs),
        };
        let policies = PolicyRegistry::new(vec![Arc::new(ConsecutiveFailuresPolicy::new(
            updater.clone(),
            active_cfg.failure_threshold,
            active_options.default_reactivation_period,
        ))]);
        let prober = Arc::new(ActiveProber::new(
            Arc::new(HyperProbeTransport::new()),
            policies,
            active_options.clone(),
        ));
        let scheduler = Arc::new(EntityScheduler::new());
        let monitor = ActiveHealthCheckMonitor::new(
            prober,
            scheduler,
            &registry,
            active_options.default_interval,
        );
        registry.add_listener(monitor.clone());

        let upstream_timeout = match config.timeouts.upstream_request_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let client = Arc::new(HyperProxyClient::new(
            upstream_timeout,
            Some(Duration::from_secs(config.timeouts.connect_secs)),
        ));
        let forwarder = Arc::new(Forwarder::new(client, Arc::new(ThreadRandomFactory)));

        let state = AppState {
            router: Arc::new(ProxyRouter::from_config(config.routes.clone())),
            registry,
            forwarder,
            passive,
        };

        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            monitor,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// The initial active probe pass runs to completion first, so traffic
    /// never starts against clusters of entirely unknown health.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        self.monitor.check_health_all().await;

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Main proxy handler.
/// Looks up the route, builds the candidate set, forwards, and feeds the
/// passive evaluator with the outcome.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let request_id = request.request_id().to_string();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    tracing::debug!(
        request_id = %request_id,
        path = %path,
        "Routing request"
    );

    let Some(route) = state.router.match_request(&request) else {
        tracing::warn!(
            request_id = %request_id,
            path = %path,
            "No route matched"
        );
        return (StatusCode::NOT_FOUND, "No matching route found").into_response();
    };

    let Some(cluster) = state.registry.get(&route.cluster) else {
        tracing::warn!(
            request_id = %request_id,
            cluster = %route.cluster,
            "Route references a cluster that is no longer registered"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Cluster unavailable").into_response();
    };

    let mut ctx = ProxyContext::new(cluster.clone(), RouteHandle::new(route.name.clone()), request);
    ctx.available_destinations = Some(cluster.available_destinations());

    if let Err(error) = state.forwarder.forward(&mut ctx).await {
        tracing::error!(
            request_id = %request_id,
            error = %error,
            "Proxy pipeline invariant violated"
        );
        return (StatusCode::INTERNAL_SERVER_ERROR, "Proxy pipeline error").into_response();
    }

    if let Some(destination) = ctx.proxied_destination.clone() {
        state.passive.request_proxied(&ctx, &cluster, &destination);
    }

    let response = ctx
        .response
        .take()
        .unwrap_or_else(|| StatusCode::BAD_GATEWAY.into_response());

    metrics::record_forwarded_request(
        &method,
        response.status().as_u16(),
        &cluster.cluster_id,
        ctx.proxied_destination
            .as_ref()
            .map(|d| d.destination_id.as_str())
            .unwrap_or("none"),
        started,
    );

    response
}
