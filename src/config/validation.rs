//! Configuration validation logic.

use crate::config::schema::ProxyConfig;
use std::collections::HashSet;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a ProxyConfig for semantic correctness.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // 1. Referential integrity: routes and destinations must point to
    //    existing clusters
    let clusters: HashSet<&str> = config.clusters.iter().map(|c| c.name.as_str()).collect();

    for route in &config.routes {
        if !clusters.contains(route.cluster.as_str()) {
            errors.push(ValidationError(format!(
                "Route '{}' references unknown cluster '{}'",
                route.name, route.cluster
            )));
        }
    }

    for destination in &config.destinations {
        if !clusters.contains(destination.cluster.as_str()) {
            errors.push(ValidationError(format!(
                "Destination '{}' references unknown cluster '{}'",
                destination.name, destination.cluster
            )));
        }
    }

    // 2. Destination ids must be unique within their cluster
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    for destination in &config.destinations {
        if !seen.insert((destination.cluster.as_str(), destination.name.as_str())) {
            errors.push(ValidationError(format!(
                "Duplicate destination '{}' in cluster '{}'",
                destination.name, destination.cluster
            )));
        }
    }

    // 3. Validate passive thresholds
    let passive = &config.health_check.passive;
    if !(0.0..=1.0).contains(&passive.rate_limit) {
        errors.push(ValidationError(
            "health_check.passive.rate_limit must be between 0.0 and 1.0".to_string(),
        ));
    }
    if passive.minimal_total_count_threshold == 0 {
        errors.push(ValidationError(
            "health_check.passive.minimal_total_count_threshold must be > 0".to_string(),
        ));
    }
    if passive.detection_window_secs == 0 {
        errors.push(ValidationError(
            "health_check.passive.detection_window_secs must be > 0".to_string(),
        ));
    }

    // 4. Validate probe settings
    let active = &config.health_check.active;
    if !active.path.starts_with('/') {
        errors.push(ValidationError(
            "health_check.active.path must start with '/'".to_string(),
        ));
    }
    if active.interval_secs == 0 {
        errors.push(ValidationError(
            "health_check.active.interval_secs must be > 0".to_string(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::*;

    fn base_config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.clusters.push(ClusterConfig {
            name: "web".into(),
            metadata: None,
            active_health: None,
            probe_interval_secs: None,
            probe_timeout_secs: None,
            probe_path: None,
            probe_policy: None,
            passive_health: None,
            reactivation_period_secs: None,
        });
        config.destinations.push(DestinationConfig {
            name: "d1".into(),
            cluster: "web".into(),
            address: "http://127.0.0.1:3000".into(),
        });
        config.routes.push(RouteConfig {
            name: "r1".into(),
            host: None,
            path_prefix: Some("/".into()),
            cluster: "web".into(),
            priority: 0,
        });
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_invalid_cluster_reference() {
        let mut config = base_config();
        config.routes[0].cluster = "missing".into();

        let errs = validate_config(&config).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].0.contains("unknown cluster 'missing'"));
    }

    #[test]
    fn test_orphan_destination() {
        let mut config = base_config();
        config.destinations[0].cluster = "nowhere".into();

        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("Destination 'd1'")));
    }

    #[test]
    fn test_duplicate_destination() {
        let mut config = base_config();
        config.destinations.push(DestinationConfig {
            name: "d1".into(),
            cluster: "web".into(),
            address: "http://127.0.0.1:3001".into(),
        });

        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("Duplicate destination")));
    }

    #[test]
    fn test_rate_limit_bounds() {
        let mut config = base_config();
        config.health_check.passive.rate_limit = 1.5;

        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("rate_limit")));
    }

    #[test]
    fn test_probe_path_must_be_absolute() {
        let mut config = base_config();
        config.health_check.active.path = "health".into();

        let errs = validate_config(&config).unwrap_err();
        assert!(errs.iter().any(|e| e.0.contains("must start with '/'")));
    }
}
