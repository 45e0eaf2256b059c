//! Endpoint configuration and health tracking.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use agentrun_core::CapabilitySet;

use crate::error::ErrorClass;

/// Which wire protocol an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    Anthropic,
    OpenAi,
}

/// Static configuration for one LLM endpoint.
///
/// Credentials are referenced by environment variable name and resolved
/// at call time; raw keys never appear in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique endpoint name, used in logs and health tracking.
    pub name: String,

    /// Wire protocol.
    pub protocol: ProtocolVariant,

    /// Base URL override. Defaults to the provider's public API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model identifier sent to the provider.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Selection priority. Lower is preferred.
    #[serde(default)]
    pub priority: u32,

    /// Capabilities this endpoint provides.
    pub capabilities: CapabilitySet,

    /// Default max output tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Disabled endpoints are never selected.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_enabled() -> bool {
    true
}

/// Pool-wide failure handling tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Consecutive failures before an endpoint starts cooling.
    pub failure_threshold: u32,

    /// First cooldown length.
    pub cooldown: Duration,

    /// Cooldown applied when the recovery probe also fails.
    pub extended_cooldown: Duration,

    /// Same-endpoint retries per call for transient failures.
    pub retry_count: u32,

    /// Delay between same-endpoint retries.
    pub retry_delay: Duration,

    /// How many alternative endpoints one call may fail over to.
    pub max_failovers: u32,

    /// Cooldown applied on a rate-limit response.
    pub rate_limit_backoff: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            extended_cooldown: Duration::from_secs(300),
            retry_count: 2,
            retry_delay: Duration::from_secs(1),
            max_failovers: 3,
            rate_limit_backoff: Duration::from_secs(30),
        }
    }
}

/// On-disk shape of the endpoint pool configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointFile {
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub settings: PoolSettings,
}

impl EndpointFile {
    /// Load pool configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let raw = std::fs::read_to_string(path)?;
        let file: EndpointFile = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        info!(
            path = %path.display(),
            endpoints = file.endpoints.len(),
            "Loaded endpoint configuration"
        );
        Ok(file)
    }
}

/// Where an endpoint sits in its recovery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Fully available.
    Healthy,
    /// Cooling off after repeated failures.
    Cooling { until: Instant },
    /// Cooling off for longer after a failed recovery probe.
    ExtendedCooling { until: Instant },
}

/// Runtime health of one endpoint.
///
/// When a cooldown elapses the endpoint becomes eligible again as a
/// probe: one live request decides whether it returns to healthy or
/// escalates to the extended cooldown.
#[derive(Debug)]
pub struct EndpointHealth {
    state: HealthState,
    consecutive_failures: u32,
    probing: bool,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_failures: 0,
            probing: false,
        }
    }
}

impl EndpointHealth {
    /// Current state, for observability.
    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Whether the endpoint may serve the next call. Marks the endpoint
    /// as probing when an elapsed cooldown is detected.
    pub fn check_eligible(&mut self, now: Instant) -> bool {
        match self.state {
            HealthState::Healthy => true,
            HealthState::Cooling { until } | HealthState::ExtendedCooling { until } => {
                if now >= until {
                    self.probing = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self, name: &str) {
        if self.state != HealthState::Healthy {
            info!(endpoint = %name, "Endpoint recovered");
        }
        self.state = HealthState::Healthy;
        self.consecutive_failures = 0;
        self.probing = false;
    }

    /// Record a failed call and advance the state machine.
    pub fn record_failure(
        &mut self,
        name: &str,
        class: ErrorClass,
        settings: &PoolSettings,
        now: Instant,
    ) {
        match class {
            // The request was malformed. Not this endpoint's fault.
            ErrorClass::Structural => return,
            // Keys can be rotated while the process runs, so an auth
            // failure cools the endpoint rather than parking it for long.
            ErrorClass::Auth => {
                warn!(endpoint = %name, "Authentication failure, cooling down");
                self.state = HealthState::Cooling {
                    until: now + settings.cooldown,
                };
                self.consecutive_failures = 0;
                self.probing = false;
                return;
            }
            ErrorClass::RateLimit => {
                warn!(endpoint = %name, "Rate limited, backing off");
                self.consecutive_failures += 1;
                let wait = if self.consecutive_failures >= settings.failure_threshold {
                    settings.cooldown.max(settings.rate_limit_backoff)
                } else {
                    settings.rate_limit_backoff
                };
                self.state = HealthState::Cooling { until: now + wait };
                self.probing = false;
                return;
            }
            ErrorClass::Transient => {}
        }

        if self.probing {
            warn!(endpoint = %name, "Recovery probe failed, extended cooldown");
            self.state = HealthState::ExtendedCooling {
                until: now + settings.extended_cooldown,
            };
            self.consecutive_failures = 0;
            self.probing = false;
            return;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= settings.failure_threshold {
            warn!(
                endpoint = %name,
                failures = self.consecutive_failures,
                "Failure threshold reached, cooling down"
            );
            self.state = HealthState::Cooling {
                until: now + settings.cooldown,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PoolSettings {
        PoolSettings {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            extended_cooldown: Duration::from_secs(300),
            rate_limit_backoff: Duration::from_secs(30),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_triggers_cooldown() {
        let s = settings();
        let mut health = EndpointHealth::default();
        let now = Instant::now();

        health.record_failure("ep", ErrorClass::Transient, &s, now);
        health.record_failure("ep", ErrorClass::Transient, &s, now);
        assert!(health.check_eligible(now));

        health.record_failure("ep", ErrorClass::Transient, &s, now);
        assert!(!health.check_eligible(now));
        assert!(matches!(health.state(), HealthState::Cooling { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_escalates() {
        let s = settings();
        let mut health = EndpointHealth::default();
        let start = Instant::now();

        for _ in 0..3 {
            health.record_failure("ep", ErrorClass::Transient, &s, start);
        }
        assert!(!health.check_eligible(start));

        // Cooldown elapses, the endpoint becomes a probe.
        let later = start + Duration::from_secs(61);
        assert!(health.check_eligible(later));

        // A single probe failure escalates straight to extended cooling.
        health.record_failure("ep", ErrorClass::Transient, &s, later);
        assert!(matches!(health.state(), HealthState::ExtendedCooling { .. }));
        assert!(!health.check_eligible(later + Duration::from_secs(299)));
        assert!(health.check_eligible(later + Duration::from_secs(301)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_restores_health() {
        let s = settings();
        let mut health = EndpointHealth::default();
        let start = Instant::now();

        for _ in 0..3 {
            health.record_failure("ep", ErrorClass::Transient, &s, start);
        }
        let later = start + Duration::from_secs(61);
        assert!(health.check_eligible(later));

        health.record_success("ep");
        assert_eq!(health.state(), HealthState::Healthy);

        // Counters were reset; one new failure does not cool again.
        health.record_failure("ep", ErrorClass::Transient, &s, later);
        assert!(health.check_eligible(later));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_cools_without_counting() {
        let s = settings();
        let mut health = EndpointHealth::default();
        let now = Instant::now();

        // A single auth error bypasses the failure counter and takes the
        // standard cooldown, not the extended one.
        health.record_failure("ep", ErrorClass::Auth, &s, now);
        assert!(matches!(health.state(), HealthState::Cooling { .. }));
        assert!(!health.check_eligible(now + Duration::from_secs(59)));
        assert!(health.check_eligible(now + Duration::from_secs(61)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_rate_limits_extend_the_wait() {
        let s = settings();
        let mut health = EndpointHealth::default();
        let now = Instant::now();

        health.record_failure("ep", ErrorClass::RateLimit, &s, now);
        assert!(!health.check_eligible(now + Duration::from_secs(29)));
        assert!(health.check_eligible(now + Duration::from_secs(31)));
        health.record_success("ep");

        // At the threshold the full cooldown applies, not just the backoff.
        for _ in 0..3 {
            health.record_failure("ep", ErrorClass::RateLimit, &s, now);
        }
        assert!(!health.check_eligible(now + Duration::from_secs(31)));
        assert!(health.check_eligible(now + Duration::from_secs(61)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_structural_failure_does_not_count() {
        let s = settings();
        let mut health = EndpointHealth::default();
        let now = Instant::now();

        for _ in 0..10 {
            health.record_failure("ep", ErrorClass::Structural, &s, now);
        }
        assert_eq!(health.state(), HealthState::Healthy);
    }
}
