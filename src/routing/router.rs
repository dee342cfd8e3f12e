//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the matching route for a request
//! - Return the matched route or explicit no-match

use axum::http::Request;

use crate::config::schema::RouteConfig;

/// A compiled route.
#[derive(Debug, Clone)]
pub struct Route {
    /// Route identifier for logging and span tags.
    pub name: String,
    /// Cluster requests are forwarded to.
    pub cluster: String,
    host: Option<String>,
    path_prefix: Option<String>,
    priority: u32,
}

impl Route {
    fn matches<B>(&self, request: &Request<B>) -> bool {
        if let Some(expected) = &self.host {
            let host = request
                .headers()
                .get(axum::http::header::HOST)
                .and_then(|value| value.to_str().ok())
                .or_else(|| request.uri().host());
            // Host comparison is case-insensitive per HTTP.
            match host {
                Some(host) => {
                    if !host.eq_ignore_ascii_case(expected) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !request.uri().path().starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Immutable route table, checked in priority order.
#[derive(Debug)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Compile routes from configuration, highest priority first.
    pub fn from_config(configs: Vec<RouteConfig>) -> Self {
        let mut routes: Vec<Route> = configs
            .into_iter()
            .map(|config| Route {
                name: config.name,
                cluster: config.cluster,
                host: config.host,
                path_prefix: config.path_prefix,
                priority: config.priority,
            })
            .collect();
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    /// Find the first route matching the request.
    pub fn match_request<B>(&self, request: &Request<B>) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(request))
    }
}
