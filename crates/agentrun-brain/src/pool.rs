//! The endpoint pool: capability routing, retry and failover.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use agentrun_core::CapabilitySet;

use crate::endpoint::{EndpointConfig, EndpointHealth, HealthState, PoolSettings, ProtocolVariant};
use crate::error::{BrainError, ErrorClass};
use crate::providers::{AnthropicAdapter, OpenAiAdapter, ProviderAdapter};
use crate::types::{ChatRequest, NormalizedResponse};
use crate::EndpointFile;

/// A pool of LLM endpoints with health tracking.
///
/// Selection happens fresh on every call: the highest-priority healthy
/// endpoint whose capabilities cover the request wins. Nothing is pinned
/// to a task, so recovered endpoints are picked up immediately.
pub struct EndpointPool {
    endpoints: Vec<EndpointConfig>,
    settings: PoolSettings,
    health: Mutex<HashMap<String, EndpointHealth>>,
    adapters: HashMap<ProtocolVariant, Arc<dyn ProviderAdapter>>,
}

impl EndpointPool {
    /// Build a pool from configuration, with the real provider adapters.
    pub fn new(file: EndpointFile) -> Self {
        let mut adapters: HashMap<ProtocolVariant, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(ProtocolVariant::Anthropic, Arc::new(AnthropicAdapter::new()));
        adapters.insert(ProtocolVariant::OpenAi, Arc::new(OpenAiAdapter::new()));
        Self::with_adapters(file.endpoints, file.settings, adapters)
    }

    /// Build a pool with caller-provided adapters.
    pub fn with_adapters(
        mut endpoints: Vec<EndpointConfig>,
        settings: PoolSettings,
        adapters: HashMap<ProtocolVariant, Arc<dyn ProviderAdapter>>,
    ) -> Self {
        endpoints.retain(|e| e.enabled);
        endpoints.sort_by_key(|e| e.priority);

        let health = endpoints
            .iter()
            .map(|e| (e.name.clone(), EndpointHealth::default()))
            .collect();

        info!(endpoints = endpoints.len(), "Endpoint pool ready");
        Self {
            endpoints,
            settings,
            health: Mutex::new(health),
            adapters,
        }
    }

    /// True when some enabled endpoint covers `required`, health aside.
    ///
    /// Used to fail a submission fast instead of queueing work that can
    /// never run.
    pub fn has_capability_coverage(&self, required: &CapabilitySet) -> bool {
        self.endpoints
            .iter()
            .any(|e| e.capabilities.is_superset_of(required))
    }

    /// Union of capabilities across all enabled endpoints.
    pub fn capabilities(&self) -> CapabilitySet {
        self.endpoints
            .iter()
            .flat_map(|e| e.capabilities.iter())
            .collect()
    }

    /// Health state of one endpoint, for observability.
    pub async fn health_of(&self, name: &str) -> Option<HealthState> {
        self.health.lock().await.get(name).map(|h| h.state())
    }

    /// Pick the best currently eligible endpoint for `required`.
    pub async fn select(&self, required: &CapabilitySet, skip: &HashSet<String>) -> Option<String> {
        let now = Instant::now();
        let mut health = self.health.lock().await;
        for endpoint in &self.endpoints {
            if skip.contains(&endpoint.name) {
                continue;
            }
            if !endpoint.capabilities.is_superset_of(required) {
                continue;
            }
            let Some(state) = health.get_mut(&endpoint.name) else {
                continue;
            };
            if state.check_eligible(now) {
                return Some(endpoint.name.clone());
            }
        }
        None
    }

    /// Execute one chat call, retrying and failing over per the pool
    /// settings.
    pub async fn chat(
        &self,
        request: &ChatRequest,
        required: &CapabilitySet,
    ) -> Result<NormalizedResponse, BrainError> {
        if !self.has_capability_coverage(required) {
            return Err(BrainError::NoCapableEndpoint {
                required: required.clone(),
            });
        }

        let mut attempted: HashSet<String> = HashSet::new();
        let mut attempts: u32 = 0;
        let mut last_error: Option<BrainError> = None;

        loop {
            let Some(name) = self.select(required, &attempted).await else {
                let last = last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no eligible endpoint".to_string());
                return Err(BrainError::AllEndpointsFailed { attempts, last });
            };

            match self.try_endpoint(&name, request).await {
                Ok(mut response) => {
                    self.record_success(&name).await;
                    response.endpoint = name;
                    return Ok(response);
                }
                Err(err) => {
                    attempts += 1;
                    let class = err.class();
                    self.record_failure(&name, class).await;

                    // A malformed request fails the same way everywhere.
                    if class == ErrorClass::Structural {
                        return Err(err);
                    }

                    warn!(endpoint = %name, error = %err, "Endpoint failed, considering failover");
                    attempted.insert(name);
                    if attempted.len() as u32 > self.settings.max_failovers {
                        return Err(BrainError::AllEndpointsFailed {
                            attempts,
                            last: err.to_string(),
                        });
                    }
                    last_error = Some(err);
                }
            }
        }
    }

    /// Run one call against a specific endpoint, retrying transient
    /// failures in place.
    async fn try_endpoint(
        &self,
        name: &str,
        request: &ChatRequest,
    ) -> Result<NormalizedResponse, BrainError> {
        let endpoint = self
            .endpoints
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| BrainError::Provider {
                endpoint: name.to_owned(),
                message: "endpoint vanished from pool".to_string(),
            })?;

        let adapter =
            self.adapters
                .get(&endpoint.protocol)
                .ok_or_else(|| BrainError::Provider {
                    endpoint: name.to_owned(),
                    message: format!("no adapter for protocol {:?}", endpoint.protocol),
                })?;

        let api_key =
            std::env::var(&endpoint.api_key_env).map_err(|_| BrainError::MissingApiKey {
                endpoint: name.to_owned(),
                env: endpoint.api_key_env.clone(),
            })?;

        let mut attempt = 0;
        loop {
            match adapter.chat(endpoint, &api_key, request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let retryable = err.class() == ErrorClass::Transient;
                    if !retryable || attempt >= self.settings.retry_count {
                        return Err(err);
                    }
                    attempt += 1;
                    debug!(endpoint = %name, attempt, error = %err, "Retrying after transient failure");
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }

    async fn record_success(&self, name: &str) {
        if let Some(h) = self.health.lock().await.get_mut(name) {
            h.record_success(name);
        }
    }

    async fn record_failure(&self, name: &str, class: ErrorClass) {
        if let Some(h) = self.health.lock().await.get_mut(name) {
            h.record_failure(name, class, &self.settings, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, StopReason, TokenUsage};
    use agentrun_core::Capability;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    const TEST_KEY_ENV: &str = "AGENTRUN_POOL_TEST_KEY";

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Ok,
        Transient,
        Auth,
        RateLimit,
    }

    /// Adapter that replays a script and records which endpoints were hit.
    struct ScriptedAdapter {
        script: StdMutex<VecDeque<Step>>,
        calls: StdMutex<Vec<String>>,
    }

    impl ScriptedAdapter {
        fn new(script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        async fn chat(
            &self,
            endpoint: &EndpointConfig,
            _api_key: &str,
            _request: &ChatRequest,
        ) -> Result<NormalizedResponse, BrainError> {
            self.calls.lock().unwrap().push(endpoint.name.clone());
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Ok);
            match step {
                Step::Ok => Ok(NormalizedResponse {
                    text: "ok".to_string(),
                    tool_calls: Vec::new(),
                    stop_reason: StopReason::EndTurn,
                    usage: TokenUsage::default(),
                    endpoint: String::new(),
                }),
                Step::Transient => Err(BrainError::Provider {
                    endpoint: endpoint.name.clone(),
                    message: "boom".to_string(),
                }),
                Step::Auth => Err(BrainError::Auth {
                    endpoint: endpoint.name.clone(),
                    message: "bad key".to_string(),
                }),
                Step::RateLimit => Err(BrainError::RateLimited {
                    endpoint: endpoint.name.clone(),
                    message: "slow down".to_string(),
                }),
            }
        }
    }

    fn endpoint(name: &str, priority: u32, caps: CapabilitySet) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            protocol: ProtocolVariant::OpenAi,
            base_url: None,
            model: "test-model".to_string(),
            api_key_env: TEST_KEY_ENV.to_string(),
            priority,
            capabilities: caps,
            max_tokens: 1024,
            enabled: true,
        }
    }

    fn pool_with(
        endpoints: Vec<EndpointConfig>,
        settings: PoolSettings,
        adapter: Arc<ScriptedAdapter>,
    ) -> EndpointPool {
        std::env::set_var(TEST_KEY_ENV, "test-key");
        let mut adapters: HashMap<ProtocolVariant, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(ProtocolVariant::OpenAi, adapter);
        EndpointPool::with_adapters(endpoints, settings, adapters)
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![ChatMessage::user("hello")])
    }

    fn fast_settings() -> PoolSettings {
        PoolSettings {
            retry_count: 0,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_priority_selection() {
        let adapter = ScriptedAdapter::new(vec![Step::Ok]);
        let pool = pool_with(
            vec![
                endpoint("backup", 10, CapabilitySet::text_only()),
                endpoint("primary", 0, CapabilitySet::text_only()),
            ],
            fast_settings(),
            adapter.clone(),
        );

        let resp = pool
            .chat(&request(), &CapabilitySet::text_only())
            .await
            .unwrap();
        assert_eq!(resp.endpoint, "primary");
        assert_eq!(adapter.calls(), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_capability_routing_skips_higher_priority() {
        let adapter = ScriptedAdapter::new(vec![Step::Ok]);
        let video = CapabilitySet::text_only().with(Capability::Video);
        let pool = pool_with(
            vec![
                endpoint("text-fast", 0, CapabilitySet::text_only()),
                endpoint("multimodal", 5, video.clone()),
            ],
            fast_settings(),
            adapter.clone(),
        );

        let required = CapabilitySet::new().with(Capability::Video);
        let resp = pool.chat(&request(), &required).await.unwrap();
        assert_eq!(resp.endpoint, "multimodal");
    }

    #[tokio::test]
    async fn test_no_capable_endpoint_fails_fast() {
        let adapter = ScriptedAdapter::new(vec![]);
        let pool = pool_with(
            vec![endpoint("text-only", 0, CapabilitySet::text_only())],
            fast_settings(),
            adapter.clone(),
        );

        let required = CapabilitySet::new().with(Capability::Video);
        let err = pool.chat(&request(), &required).await.unwrap_err();
        assert!(matches!(err, BrainError::NoCapableEndpoint { .. }));
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failover_to_next_endpoint() {
        let adapter = ScriptedAdapter::new(vec![Step::Transient, Step::Ok]);
        let pool = pool_with(
            vec![
                endpoint("primary", 0, CapabilitySet::text_only()),
                endpoint("backup", 1, CapabilitySet::text_only()),
            ],
            fast_settings(),
            adapter.clone(),
        );

        let resp = pool
            .chat(&request(), &CapabilitySet::text_only())
            .await
            .unwrap();
        assert_eq!(resp.endpoint, "backup");
        assert_eq!(adapter.calls(), vec!["primary", "backup"]);
    }

    #[tokio::test]
    async fn test_three_endpoint_exhaustion() {
        let adapter =
            ScriptedAdapter::new(vec![Step::Transient, Step::Transient, Step::Transient]);
        let pool = pool_with(
            vec![
                endpoint("a", 0, CapabilitySet::text_only()),
                endpoint("b", 1, CapabilitySet::text_only()),
                endpoint("c", 2, CapabilitySet::text_only()),
            ],
            fast_settings(),
            adapter.clone(),
        );

        let err = pool
            .chat(&request(), &CapabilitySet::text_only())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrainError::AllEndpointsFailed { attempts: 3, .. }
        ));
        assert_eq!(adapter.calls(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_cooled_endpoint_is_skipped_on_next_call() {
        let settings = PoolSettings {
            failure_threshold: 1,
            ..fast_settings()
        };
        let adapter = ScriptedAdapter::new(vec![Step::Transient, Step::Ok, Step::Ok]);
        let pool = pool_with(
            vec![
                endpoint("primary", 0, CapabilitySet::text_only()),
                endpoint("backup", 1, CapabilitySet::text_only()),
            ],
            settings,
            adapter.clone(),
        );

        let first = pool
            .chat(&request(), &CapabilitySet::text_only())
            .await
            .unwrap();
        assert_eq!(first.endpoint, "backup");

        // Primary is cooling, the next call goes straight to backup.
        let second = pool
            .chat(&request(), &CapabilitySet::text_only())
            .await
            .unwrap();
        assert_eq!(second.endpoint, "backup");
        assert_eq!(adapter.calls(), vec!["primary", "backup", "backup"]);
    }

    #[tokio::test]
    async fn test_transient_retry_stays_on_endpoint() {
        let settings = PoolSettings {
            retry_count: 2,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let adapter = ScriptedAdapter::new(vec![Step::Transient, Step::Transient, Step::Ok]);
        let pool = pool_with(
            vec![endpoint("only", 0, CapabilitySet::text_only())],
            settings,
            adapter.clone(),
        );

        let resp = pool
            .chat(&request(), &CapabilitySet::text_only())
            .await
            .unwrap();
        assert_eq!(resp.endpoint, "only");
        assert_eq!(adapter.calls(), vec!["only", "only", "only"]);
    }

    #[tokio::test]
    async fn test_auth_failure_cools_and_fails_over() {
        let adapter = ScriptedAdapter::new(vec![Step::Auth, Step::Ok]);
        let pool = pool_with(
            vec![
                endpoint("primary", 0, CapabilitySet::text_only()),
                endpoint("backup", 1, CapabilitySet::text_only()),
            ],
            fast_settings(),
            adapter.clone(),
        );

        let resp = pool
            .chat(&request(), &CapabilitySet::text_only())
            .await
            .unwrap();
        assert_eq!(resp.endpoint, "backup");
        assert!(matches!(
            pool.health_of("primary").await,
            Some(HealthState::Cooling { .. })
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_backoff() {
        let adapter = ScriptedAdapter::new(vec![Step::RateLimit, Step::Ok]);
        let pool = pool_with(
            vec![
                endpoint("primary", 0, CapabilitySet::text_only()),
                endpoint("backup", 1, CapabilitySet::text_only()),
            ],
            fast_settings(),
            adapter.clone(),
        );

        let resp = pool
            .chat(&request(), &CapabilitySet::text_only())
            .await
            .unwrap();
        assert_eq!(resp.endpoint, "backup");
        assert!(matches!(
            pool.health_of("primary").await,
            Some(HealthState::Cooling { .. })
        ));
    }
}
