//! Runtime configuration
//!
//! Environment-driven settings for federation, rate limits, and the mesh
//! timers, with development defaults matching the documented knobs:
//! `FEDERATION_DOMAIN` / `PUBLIC_DOMAIN`, `FEDERATION_SHARED_SECRET`,
//! `FEDERATION_HMAC_REQUIRED`, `FEDERATION_DEFAULT_ALLOW`,
//! `A2A_ORG_RATE_LIMIT_PER_MIN`, and `TRUST_RECALC_INTERVAL_SECONDS`.

use crate::domain_types::HubDomain;
use std::time::Duration;

/// Federation-layer settings
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Local hub domain, appended to outbound `from` and validated on inbound `to`
    pub domain: HubDomain,
    /// Shared HMAC key for envelope signing; `None` means unsigned (dev)
    pub shared_secret: Option<String>,
    /// Reject unsigned or wrongly signed envelopes when true
    pub hmac_required: bool,
    /// ACL result when no rule matches an inbound federation message
    pub default_allow: bool,
    /// Outbound HTTP timeout
    pub timeout: Duration,
}

impl FederationConfig {
    fn default_domain() -> HubDomain {
        HubDomain::try_new("localhost".to_string()).unwrap_or_else(|_| unreachable!())
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            domain: Self::default_domain(),
            shared_secret: None,
            hmac_required: true,
            default_allow: true,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Mesh engine timers and limits
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Minimum contract age before the sweeper may award
    pub bidding_window: Duration,
    /// Sweeper wake interval
    pub award_sweep_interval: Duration,
    /// Age at which a bid-less contract is cancelled
    pub no_bid_expiry: Duration,
    /// Time the winner has to deliver after award
    pub max_execution_window: Duration,
    /// Validation score below which a delivery fails the contract
    pub validation_threshold: f64,
    /// Per-organization send cap per minute
    pub org_rate_limit_per_min: u64,
    /// Per-API-key send cap per minute when the key has no stored quota
    pub api_key_rate_limit_per_min: u64,
    /// Reputation sweep cadence
    pub trust_recalc_interval: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            bidding_window: Duration::from_secs(3),
            award_sweep_interval: Duration::from_secs(2),
            no_bid_expiry: Duration::from_secs(60),
            max_execution_window: Duration::from_secs(300),
            validation_threshold: 0.6,
            org_rate_limit_per_min: 600,
            api_key_rate_limit_per_min: 100,
            trust_recalc_interval: Duration::from_secs(300),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Federation layer settings
    pub federation: FederationConfig,
    /// Mesh engine settings
    pub mesh: MeshConfig,
}

impl AppConfig {
    /// Loads configuration from the process environment
    ///
    /// Unset or unparseable values fall back to the defaults above.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let domain = env_string("FEDERATION_DOMAIN").or_else(|| env_string("PUBLIC_DOMAIN"));
        if let Some(domain) = domain.and_then(|d| HubDomain::try_new(d).ok()) {
            config.federation.domain = domain;
        }
        config.federation.shared_secret = env_string("FEDERATION_SHARED_SECRET");
        if let Some(required) = env_bool("FEDERATION_HMAC_REQUIRED") {
            config.federation.hmac_required = required;
        }
        if let Some(allow) = env_bool("FEDERATION_DEFAULT_ALLOW") {
            config.federation.default_allow = allow;
        }
        if let Some(limit) = env_parse::<u64>("A2A_ORG_RATE_LIMIT_PER_MIN") {
            config.mesh.org_rate_limit_per_min = limit;
        }
        if let Some(secs) = env_parse::<u64>("TRUST_RECALC_INTERVAL_SECONDS") {
            config.mesh.trust_recalc_interval = Duration::from_secs(secs);
        }

        config
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.mesh.bidding_window, Duration::from_secs(3));
        assert_eq!(config.mesh.award_sweep_interval, Duration::from_secs(2));
        assert_eq!(config.mesh.org_rate_limit_per_min, 600);
        assert_eq!(config.mesh.api_key_rate_limit_per_min, 100);
        assert!(config.federation.hmac_required);
        assert_eq!(config.federation.timeout, Duration::from_secs(10));
        assert_eq!(config.federation.domain.to_string(), "localhost");
    }
}
