//! Forwarding error taxonomy.
//!
//! Two tiers: pipeline invariant violations are fatal request errors;
//! transport and destination failures are expected values observed through
//! the context's error feature.

use axum::http::StatusCode;

/// Discriminated reason a forwarded request failed.
///
/// Absence of a [`ForwarderErrorFeature`] on the context means the request
/// succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderError {
    /// The candidate set was empty after upstream filtering.
    NoAvailableDestinations,
    /// Connecting to or sending the request to the destination failed.
    Request,
    /// The configured upstream request timeout expired.
    RequestTimedOut,
    /// The inbound client canceled the request.
    RequestCanceled,
    /// Reading the request body from the client failed.
    RequestBodyClient,
    /// Writing the request body to the destination failed.
    RequestBodyDestination,
    /// Writing the response body to the client failed.
    ResponseBodyClient,
    /// Reading the response body from the destination failed.
    ResponseBodyDestination,
    /// The destination rejected a protocol upgrade request.
    UpgradeRequestDestination,
    /// The destination broke the connection after a protocol upgrade.
    UpgradeResponseDestination,
}

impl ForwarderError {
    /// Whether this failure counts against the destination's health.
    ///
    /// Client-side failures and cancellations are ambiguous at best and are
    /// attributed to the client, not the destination.
    pub fn is_destination_failure(self) -> bool {
        matches!(
            self,
            ForwarderError::Request
                | ForwarderError::RequestTimedOut
                | ForwarderError::RequestBodyDestination
                | ForwarderError::ResponseBodyDestination
                | ForwarderError::UpgradeRequestDestination
                | ForwarderError::UpgradeResponseDestination
        )
    }

    /// Response status reported to the client for this failure.
    pub fn status(self) -> StatusCode {
        match self {
            ForwarderError::NoAvailableDestinations => StatusCode::SERVICE_UNAVAILABLE,
            ForwarderError::RequestTimedOut => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl std::fmt::Display for ForwarderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ForwarderError::NoAvailableDestinations => "no available destinations",
            ForwarderError::Request => "request failed",
            ForwarderError::RequestTimedOut => "request timed out",
            ForwarderError::RequestCanceled => "request canceled by client",
            ForwarderError::RequestBodyClient => "request body failed (client)",
            ForwarderError::RequestBodyDestination => "request body failed (destination)",
            ForwarderError::ResponseBodyClient => "response body failed (client)",
            ForwarderError::ResponseBodyDestination => "response body failed (destination)",
            ForwarderError::UpgradeRequestDestination => "upgrade request failed (destination)",
            ForwarderError::UpgradeResponseDestination => "upgrade response failed (destination)",
        };
        write!(f, "{}", name)
    }
}

/// The error outcome attached to a [`crate::proxy::ProxyContext`].
#[derive(Debug)]
pub struct ForwarderErrorFeature {
    pub error: ForwarderError,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ForwarderErrorFeature {
    pub fn new(error: ForwarderError) -> Self {
        Self { error, cause: None }
    }

    pub fn with_cause(
        error: ForwarderError,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            error,
            cause: Some(cause.into()),
        }
    }
}

/// Fatal pipeline invariant violations.
///
/// These indicate misconfiguration of the surrounding pipeline, not a
/// destination failure, and crash the request with a descriptive error.
#[derive(Debug)]
pub enum PipelineError {
    /// No upstream stage populated the candidate destination list.
    MissingDestinations,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::MissingDestinations => {
                write!(f, "available destinations were not set; upstream pipeline stages did not run")
            }
        }
    }
}

impl std::error::Error for PipelineError {}
