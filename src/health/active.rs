//! Active health probing.
//!
//! # Responsibilities
//! - Build and send a probe request to every destination of a cluster
//! - Capture per-destination results without aborting the batch
//! - Hand the batch to the cluster's configured policy
//!
//! # Design Decisions
//! - One destination's probe failure never hides the others' results
//! - An unknown policy name fails the batch loudly; a cluster is never
//!   silently left unprobed
//! - Probe responses are owned by the batch and released when it ends,
//!   whether or not the policy succeeds

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

use crate::cluster::{Cluster, Destination};
use crate::health::updater::HealthUpdater;
use crate::health::HealthVerdict;

/// Cluster metadata key overriding the consecutive failure threshold.
pub const CONSECUTIVE_FAILURES_THRESHOLD_KEY: &str = "ConsecutiveFailuresHealthPolicy.Threshold";

/// Process-wide defaults for active probing.
#[derive(Debug, Clone)]
pub struct ActiveHealthOptions {
    pub default_interval: Duration,
    pub default_timeout: Duration,
    pub default_path: String,
    pub default_policy: String,
    /// Exclusion period applied when a policy marks a destination unhealthy.
    pub default_reactivation_period: Duration,
}

impl Default for ActiveHealthOptions {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(10),
            default_timeout: Duration::from_secs(5),
            default_path: "/health".to_string(),
            default_policy: ConsecutiveFailuresPolicy::NAME.to_string(),
            default_reactivation_period: Duration::from_secs(60),
        }
    }
}

/// Why a probe produced no usable response.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to build probe request: {0}")]
    Request(String),
    #[error("probe transport failed: {0}")]
    Transport(String),
    #[error("probe timed out after {0:?}")]
    TimedOut(Duration),
    #[error("policy failed: {0}")]
    Policy(String),
}

/// A received probe response. Dropping it releases the underlying
/// connection resources.
pub trait ProbeResponse: Send {
    fn status(&self) -> StatusCode;
}

/// Transport used to deliver probe requests; a seam for tests.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn send(&self, request: Request<Body>, timeout: Duration) -> Result<Box<dyn ProbeResponse>, ProbeError>;
}

/// Production probe transport on a dedicated hyper client.
pub struct HyperProbeTransport {
    client: Client<HttpConnector, Body>,
}

impl HyperProbeTransport {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }
}

impl Default for HyperProbeTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct HyperProbeResponse(hyper::Response<hyper::body::Incoming>);

impl ProbeResponse for HyperProbeResponse {
    fn status(&self) -> StatusCode {
        self.0.status()
    }
}

#[async_trait]
impl ProbeTransport for HyperProbeTransport {
    async fn send(&self, request: Request<Body>, timeout: Duration) -> Result<Box<dyn ProbeResponse>, ProbeError> {
        match tokio::time::timeout(timeout, self.client.request(request)).await {
            Err(_) => Err(ProbeError::TimedOut(timeout)),
            Ok(Err(error)) => Err(ProbeError::Transport(error.to_string())),
            Ok(Ok(response)) => Ok(Box::new(HyperProbeResponse(response))),
        }
    }
}

/// Outcome of probing one destination.
pub struct DestinationProbingResult {
    pub destination: Arc<Destination>,
    pub response: Option<Box<dyn ProbeResponse>>,
    pub error: Option<ProbeError>,
}

/// Builds the probe request for a destination.
pub struct ProbingRequestFactory;

impl ProbingRequestFactory {
    pub fn create(
        &self,
        cluster: &Cluster,
        destination: &Destination,
        default_path: &str,
    ) -> Result<Request<Body>, ProbeError> {
        let path = cluster.active.path.as_deref().unwrap_or(default_path);
        let base = destination.address.to_string();
        let uri: Uri = format!("{}{}", base.trim_end_matches('/'), path)
            .parse()
            .map_err(|e| ProbeError::Request(format!("{}", e)))?;
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .map_err(|e| ProbeError::Request(e.to_string()))
    }
}

/// Decides destination health from a batch of probe results.
pub trait ActiveHealthPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once per probing pass with one result per destination.
    fn probing_completed(
        &self,
        cluster: &Arc<Cluster>,
        results: &[DestinationProbingResult],
    ) -> Result<(), ProbeError>;
}

/// Name → policy mapping built once at startup.
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<dyn ActiveHealthPolicy>>,
}

impl PolicyRegistry {
    pub fn new(policies: Vec<Arc<dyn ActiveHealthPolicy>>) -> Self {
        let policies = policies
            .into_iter()
            .map(|policy| (policy.name().to_string(), policy))
            .collect();
        Self { policies }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActiveHealthPolicy>> {
        self.policies.get(name).cloned()
    }
}

/// Marks a destination unhealthy after N probe failures in a row.
pub struct ConsecutiveFailuresPolicy {
    updater: Arc<HealthUpdater>,
    default_threshold: f64,
    reactivation_period: Duration,
}

impl ConsecutiveFailuresPolicy {
    pub const NAME: &'static str = "ConsecutiveFailures";

    pub fn new(updater: Arc<HealthUpdater>, default_threshold: f64, reactivation_period: Duration) -> Self {
        Self {
            updater,
            default_threshold,
            reactivation_period,
        }
    }
}

impl ActiveHealthPolicy for ConsecutiveFailuresPolicy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probing_completed(
        &self,
        cluster: &Arc<Cluster>,
        results: &[DestinationProbingResult],
    ) -> Result<(), ProbeError> {
        let threshold = cluster
            .metadata_f64(CONSECUTIVE_FAILURES_THRESHOLD_KEY)
            .unwrap_or(self.default_threshold);

        let mut verdicts = Vec::with_capacity(results.len());
        for result in results {
            let succeeded = result.error.is_none()
                && result
                    .response
                    .as_ref()
                    .map(|response| response.status().is_success())
                    .unwrap_or(false);

            let verdict = if succeeded {
                result.destination.probe_failures.store(0, Ordering::Relaxed);
                HealthVerdict::healthy()
            } else {
                let failures = result.destination.probe_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if f64::from(failures) >= threshold {
                    HealthVerdict::unhealthy(self.reactivation_period)
                } else {
                    HealthVerdict::healthy()
                }
            };
            verdicts.push((result.destination.clone(), verdict));
        }

        self.updater.set_active(cluster, verdicts);
        Ok(())
    }
}

/// Probes every destination of a cluster and dispatches the batch.
pub struct ActiveProber {
    transport: Arc<dyn ProbeTransport>,
    factory: ProbingRequestFactory,
    policies: PolicyRegistry,
    options: ActiveHealthOptions,
}

impl ActiveProber {
    pub fn new(transport: Arc<dyn ProbeTransport>, policies: PolicyRegistry, options: ActiveHealthOptions) -> Self {
        Self {
            transport,
            factory: ProbingRequestFactory,
            policies,
            options,
        }
    }

    /// Run one probing pass over the cluster.
    pub async fn probe_cluster(&self, cluster: &Arc<Cluster>) {
        let span = tracing::info_span!(
            "active_health_probe",
            proxy.cluster_id = %cluster.cluster_id,
            otel.status_code = tracing::field::Empty,
        );
        self.probe_cluster_inner(cluster).instrument(span).await
    }

    async fn probe_cluster_inner(&self, cluster: &Arc<Cluster>) {
        let policy_name = cluster.active.policy.as_deref().unwrap_or(&self.options.default_policy);
        let Some(policy) = self.policies.get(policy_name) else {
            tracing::error!(
                cluster = %cluster.cluster_id,
                policy = %policy_name,
                "Active health probing failed: unknown policy"
            );
            tracing::Span::current().record("otel.status_code", "ERROR");
            return;
        };

        let probes = cluster
            .destinations
            .iter()
            .map(|destination| self.probe_destination(cluster, destination));
        // Results own the responses; they are released when the batch scope
        // ends, even if the policy fails.
        let results = futures::future::join_all(probes).await;

        match policy.probing_completed(cluster, &results) {
            Ok(()) => {
                tracing::Span::current().record("otel.status_code", "OK");
            }
            Err(error) => {
                tracing::error!(
                    cluster = %cluster.cluster_id,
                    error = %error,
                    "Active health probing failed"
                );
                tracing::Span::current().record("otel.status_code", "ERROR");
            }
        }
    }

    async fn probe_destination(&self, cluster: &Arc<Cluster>, destination: &Arc<Destination>) -> DestinationProbingResult {
        let request = match self.factory.create(cluster, destination, &self.options.default_path) {
            Ok(request) => request,
            Err(error) => {
                return DestinationProbingResult {
                    destination: destination.clone(),
                    response: None,
                    error: Some(error),
                }
            }
        };

        tracing::debug!(
            uri = %request.uri(),
            destination = %destination.destination_id,
            cluster = %cluster.cluster_id,
            "Sending health probe"
        );

        let timeout = cluster.active.timeout.unwrap_or(self.options.default_timeout);
        match self.transport.send(request, timeout).await {
            Ok(response) => {
                tracing::debug!(
                    destination = %destination.destination_id,
                    cluster = %cluster.cluster_id,
                    status = %response.status(),
                    "Destination probing completed"
                );
                DestinationProbingResult {
                    destination: destination.clone(),
                    response: Some(response),
                    error: None,
                }
            }
            Err(error) => {
                tracing::debug!(
                    destination = %destination.destination_id,
                    cluster = %cluster.cluster_id,
                    error = %error,
                    "Destination probing failed"
                );
                DestinationProbingResult {
                    destination: destination.clone(),
                    response: None,
                    error: Some(error),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ActiveHealthSettings, Health, PassiveHealthSettings};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Scripted transport keyed by destination port, counting response drops.
    struct ScriptedTransport {
        // port → status, or None to fail the probe.
        outcomes: Mutex<HashMap<u16, Option<StatusCode>>>,
        live_responses: Arc<AtomicUsize>,
    }

    struct CountedResponse {
        status: StatusCode,
        live: Arc<AtomicUsize>,
    }

    impl ProbeResponse for CountedResponse {
        fn status(&self) -> StatusCode {
            self.status
        }
    }

    impl Drop for CountedResponse {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProbeTransport for ScriptedTransport {
        async fn send(&self, request: Request<Body>, _timeout: Duration) -> Result<Box<dyn ProbeResponse>, ProbeError> {
            let port = request.uri().port_u16().unwrap_or(80);
            let outcome = self.outcomes.lock().unwrap().get(&port).cloned().flatten();
            match outcome {
                Some(status) => {
                    self.live_responses.fetch_add(1, Ordering::SeqCst);
                    Ok(Box::new(CountedResponse {
                        status,
                        live: self.live_responses.clone(),
                    }))
                }
                None => Err(ProbeError::Transport("connection refused".to_string())),
            }
        }
    }

    /// Policy capturing the batch it received.
    struct RecordingPolicy {
        seen: Mutex<Vec<(String, bool, bool)>>,
    }

    impl ActiveHealthPolicy for RecordingPolicy {
        fn name(&self) -> &'static str {
            "Recording"
        }

        fn probing_completed(
            &self,
            _cluster: &Arc<Cluster>,
            results: &[DestinationProbingResult],
        ) -> Result<(), ProbeError> {
            let mut seen = self.seen.lock().unwrap();
            for result in results {
                seen.push((
                    result.destination.destination_id.clone(),
                    result.response.is_some(),
                    result.error.is_some(),
                ));
            }
            Ok(())
        }
    }

    fn make_cluster(ports: &[u16], policy: Option<&str>) -> Arc<Cluster> {
        let destinations = ports
            .iter()
            .enumerate()
            .map(|(i, port)| {
                Arc::new(Destination::new(
                    format!("d{}", i + 1),
                    format!("http://127.0.0.1:{}", port).parse().unwrap(),
                ))
            })
            .collect();
        Arc::new(Cluster::new(
            "c1",
            destinations,
            ActiveHealthSettings {
                enabled: true,
                interval: None,
                timeout: None,
                path: None,
                policy: policy.map(String::from),
            },
            PassiveHealthSettings::default(),
            HashMap::new(),
        ))
    }

    fn scripted(outcomes: Vec<(u16, Option<StatusCode>)>) -> (Arc<ScriptedTransport>, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(ScriptedTransport {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            live_responses: live.clone(),
        });
        (transport, live)
    }

    #[tokio::test]
    async fn test_batch_isolates_failures_and_disposes_responses() {
        let cluster = make_cluster(&[9001, 9002, 9003], Some("Recording"));
        let (transport, live) = scripted(vec![
            (9001, Some(StatusCode::OK)),
            (9002, None),
            (9003, Some(StatusCode::OK)),
        ]);
        let policy = Arc::new(RecordingPolicy {
            seen: Mutex::new(Vec::new()),
        });
        let prober = ActiveProber::new(
            transport,
            PolicyRegistry::new(vec![policy.clone()]),
            ActiveHealthOptions::default(),
        );

        prober.probe_cluster(&cluster).await;

        let seen = policy.seen.lock().unwrap();
        assert_eq!(seen.len(), 3, "one result per destination");
        assert_eq!(seen[0], ("d1".to_string(), true, false));
        assert_eq!(seen[1], ("d2".to_string(), false, true));
        assert_eq!(seen[2], ("d3".to_string(), true, false));
        assert_eq!(live.load(Ordering::SeqCst), 0, "all responses disposed");
    }

    #[tokio::test]
    async fn test_unknown_policy_fails_batch() {
        let cluster = make_cluster(&[9001], Some("NoSuchPolicy"));
        let (transport, live) = scripted(vec![(9001, Some(StatusCode::OK))]);
        let prober = ActiveProber::new(
            transport.clone(),
            PolicyRegistry::new(vec![]),
            ActiveHealthOptions::default(),
        );

        prober.probe_cluster(&cluster).await;

        // The batch never ran: no probes sent, nothing leaked.
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(cluster.destinations[0].health(), Health::Unknown);
    }

    #[tokio::test]
    async fn test_consecutive_failures_threshold() {
        let cluster = make_cluster(&[9001], None);
        let (transport, _live) = scripted(vec![(9001, None)]);
        let updater = Arc::new(HealthUpdater::new());
        let policy = Arc::new(ConsecutiveFailuresPolicy::new(updater, 2.0, Duration::from_secs(60)));
        let prober = ActiveProber::new(
            transport,
            PolicyRegistry::new(vec![policy]),
            ActiveHealthOptions::default(),
        );

        prober.probe_cluster(&cluster).await;
        assert_eq!(cluster.destinations[0].health(), Health::Healthy, "one failure below threshold");

        prober.probe_cluster(&cluster).await;
        assert_eq!(cluster.destinations[0].health(), Health::Unhealthy, "second failure trips");
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let cluster = make_cluster(&[9001], None);
        let (transport, _live) = scripted(vec![(9001, None)]);
        let updater = Arc::new(HealthUpdater::new());
        let policy = Arc::new(ConsecutiveFailuresPolicy::new(updater, 2.0, Duration::from_secs(60)));
        let prober = ActiveProber::new(
            transport.clone(),
            PolicyRegistry::new(vec![policy]),
            ActiveHealthOptions::default(),
        );

        prober.probe_cluster(&cluster).await;

        // Destination comes back; the streak resets and health goes Healthy.
        transport.outcomes.lock().unwrap().insert(9001, Some(StatusCode::OK));
        prober.probe_cluster(&cluster).await;
        assert_eq!(cluster.destinations[0].health(), Health::Healthy);
        assert_eq!(cluster.destinations[0].probe_failures.load(Ordering::Relaxed), 0);

        // A single new failure is again below the threshold.
        transport.outcomes.lock().unwrap().insert(9001, None);
        prober.probe_cluster(&cluster).await;
        assert_eq!(cluster.destinations[0].health(), Health::Healthy);
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_failure() {
        let cluster = make_cluster(&[9001], None);
        let (transport, _live) = scripted(vec![(9001, Some(StatusCode::INTERNAL_SERVER_ERROR))]);
        let updater = Arc::new(HealthUpdater::new());
        let policy = Arc::new(ConsecutiveFailuresPolicy::new(updater, 1.0, Duration::from_secs(60)));
        let prober = ActiveProber::new(
            transport,
            PolicyRegistry::new(vec![policy]),
            ActiveHealthOptions::default(),
        );

        prober.probe_cluster(&cluster).await;
        assert_eq!(cluster.destinations[0].health(), Health::Unhealthy);
    }

    #[test]
    fn test_probe_request_factory_joins_path() {
        let cluster = make_cluster(&[9001], None);
        let request = ProbingRequestFactory
            .create(&cluster, &cluster.destinations[0], "/health")
            .unwrap();
        assert_eq!(request.uri().to_string(), "http://127.0.0.1:9001/health");
    }

    #[test]
    fn test_probe_request_factory_cluster_path_override() {
        let destinations = vec![Arc::new(Destination::new(
            "d1",
            "http://127.0.0.1:9001".parse::<Uri>().unwrap(),
        ))];
        let cluster = Arc::new(Cluster::new(
            "c1",
            destinations,
            ActiveHealthSettings {
                enabled: true,
                interval: None,
                timeout: None,
                path: Some("/livez".to_string()),
                policy: None,
            },
            PassiveHealthSettings::default(),
            HashMap::new(),
        ));
        let request = ProbingRequestFactory
            .create(&cluster, &cluster.destinations[0], "/health")
            .unwrap();
        assert_eq!(request.uri().path(), "/livez");
    }
}
