//! The resilient dispatcher itself (component F): composes the primitives in
//! this module around a single [`OutboundConnector`] call, in the fixed
//! order from §4.F — RateLimiter → Bulkhead → CircuitBreaker → Retry →
//! TimeLimiter → actual call → Fallback.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PayBridgeError;
use crate::outbound::{OutboundConnector, OutboundRequest, OutboundResponse};
use crate::types::FlowContext;

use super::bulkhead::{Bulkhead, BulkheadConfig};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use super::rate_limiter::{RateLimiter, RateLimiterConfig};
use super::retry::{self, RetryConfig};
use super::time_limiter;

/// A pure function (in spirit — here a fixed, configurable shape) mapping a
/// dispatch failure to a canonical negative response, invoked only after
/// every other primitive has given up (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub status_code: u16,
    pub reason: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { status_code: 503, reason: "service unavailable".to_string() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self { enabled: false, interval: Duration::from_secs(30) }
    }
}

/// The full composable resilience policy for one service, optionally
/// overridden per tenant (§4.F "per-service registry keyed by (serviceName,
/// tenantId), policy defaults per service name, override per tenant").
#[derive(Debug, Clone)]
pub struct ResiliencePolicy {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub bulkhead: BulkheadConfig,
    pub rate_limiter: RateLimiterConfig,
    pub time_limit: Duration,
    pub fallback: FallbackConfig,
    pub health_check: HealthCheckConfig,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            bulkhead: BulkheadConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            time_limit: Duration::from_secs(10),
            fallback: FallbackConfig::default(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

/// A per-service, per-tenant health snapshot, as surfaced by
/// `getServiceHealthStatus(tenantId)` (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealthStatus {
    pub service: String,
    pub circuit_state: CircuitState,
    pub healthy: Option<bool>,
    pub checked_at: Option<DateTime<Utc>>,
}

struct ServiceEntry {
    policy: ResiliencePolicy,
    circuit_breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    rate_limiter: RateLimiter,
    health: RwLock<Option<(DateTime<Utc>, bool)>>,
}

impl ServiceEntry {
    fn new(service: &str, policy: ResiliencePolicy) -> Self {
        Self {
            circuit_breaker: CircuitBreaker::new(service, policy.circuit_breaker.clone()),
            bulkhead: Bulkhead::new(service, policy.bulkhead.clone()),
            rate_limiter: RateLimiter::new(service, policy.rate_limiter),
            health: RwLock::new(None),
            policy,
        }
    }
}

/// Executes outbound calls (clearing-system API, fraud engine, other bank
/// services) under the composed resilience policy (§4.F).
#[derive(Default)]
pub struct ResilientDispatcher {
    defaults: DashMap<String, ResiliencePolicy>,
    registry: DashMap<(String, String), Arc<ServiceEntry>>,
}

impl ResilientDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the default policy for a service name, used for any tenant
    /// without an explicit override.
    pub fn set_default_policy(&self, service: impl Into<String>, policy: ResiliencePolicy) {
        self.defaults.insert(service.into(), policy);
    }

    /// Publishes a tenant-scoped override for a service.
    pub fn set_tenant_policy(&self, service: &str, tenant_id: &str, policy: ResiliencePolicy) {
        let entry = Arc::new(ServiceEntry::new(service, policy));
        self.registry.insert((service.to_string(), tenant_id.to_string()), entry);
    }

    fn entry_for(&self, service: &str, tenant_id: &str) -> Arc<ServiceEntry> {
        let key = (service.to_string(), tenant_id.to_string());
        if let Some(existing) = self.registry.get(&key) {
            return existing.clone();
        }
        let policy = self.defaults.get(service).map(|p| p.clone()).unwrap_or_default();
        let entry = Arc::new(ServiceEntry::new(service, policy));
        self.registry.insert(key, entry.clone());
        entry
    }

    /// Runs `request` against `connector`, composing RateLimiter → Bulkhead →
    /// CircuitBreaker → Retry → TimeLimiter → the call → Fallback. Returns
    /// `Ok` for every outcome except flow cancellation: a cancelled call
    /// never reaches the circuit breaker or the fallback (§5) and is
    /// surfaced to the caller as `Err(Cancelled)` instead.
    pub async fn dispatch(
        &self,
        ctx: &FlowContext,
        connector: &dyn OutboundConnector,
        request: OutboundRequest,
    ) -> Result<OutboundResponse, PayBridgeError> {
        let service = connector.service_name().to_string();
        let tenant_id = ctx.tenant_id.as_str().to_string();
        let entry = self.entry_for(&service, &tenant_id);

        if let Err(err) = entry.rate_limiter.check() {
            return Ok(self.fallback_response(&entry.policy.fallback, &err));
        }

        if ctx.is_cancelled() {
            return Err(PayBridgeError::Cancelled);
        }

        let _permit = match entry.bulkhead.acquire().await {
            Ok(permit) => permit,
            Err(err) => return Ok(self.fallback_response(&entry.policy.fallback, &err)),
        };

        if ctx.is_cancelled() {
            return Err(PayBridgeError::Cancelled);
        }

        if !entry.circuit_breaker.allow_request() {
            let err = PayBridgeError::CircuitOpen { service: service.clone() };
            warn!(service = %service, tenant_id = %tenant_id, "circuit open, call rejected without I/O");
            return Ok(self.fallback_response(&entry.policy.fallback, &err));
        }

        let outcome = retry::execute_with_retry(&service, &entry.policy.retry, || {
            let request = request.clone();
            let tenant_id = tenant_id.clone();
            let entry = entry.clone();
            let service = service.clone();
            async move {
                let started = Instant::now();
                let called = time_limiter::execute_with_deadline(
                    entry.policy.time_limit,
                    connector.call(&tenant_id, request),
                )
                .await;
                let elapsed = started.elapsed();
                classify_and_record(&entry.circuit_breaker, &service, called, elapsed)
            }
        })
        .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(err) => Ok(self.fallback_response(&entry.policy.fallback, &err)),
        }
    }

    fn fallback_response(&self, fallback: &FallbackConfig, err: &PayBridgeError) -> OutboundResponse {
        warn!(error = %err, "resilient dispatcher invoking fallback");
        OutboundResponse {
            status_code: fallback.status_code,
            body: serde_json::json!({
                "error": fallback.reason,
                "detail": err.to_string(),
                "kind": format!("{:?}", err.kind()),
            }),
        }
    }

    /// Probes `connector`'s health, memoized for `healthCheckInterval` (§4.F).
    pub async fn check_health(&self, tenant_id: &str, connector: &dyn OutboundConnector) -> bool {
        let service = connector.service_name().to_string();
        let entry = self.entry_for(&service, tenant_id);
        if !entry.policy.health_check.enabled {
            return true;
        }
        let now = Utc::now();
        if let Some((checked_at, healthy)) = *entry.health.read().unwrap() {
            let stale = now.signed_duration_since(checked_at).num_milliseconds() as u64
                >= entry.policy.health_check.interval.as_millis() as u64;
            if !stale {
                return healthy;
            }
        }
        let healthy = connector.health_check(tenant_id).await.unwrap_or(false);
        *entry.health.write().unwrap() = Some((now, healthy));
        healthy
    }

    /// `getServiceHealthStatus(tenantId)`: a snapshot of every service this
    /// tenant has dispatched through.
    pub fn service_health_status(&self, tenant_id: &str) -> Vec<ServiceHealthStatus> {
        self.registry
            .iter()
            .filter(|entry| entry.key().1 == tenant_id)
            .map(|entry| {
                let health = *entry.value().health.read().unwrap();
                ServiceHealthStatus {
                    service: entry.key().0.clone(),
                    circuit_state: entry.value().circuit_breaker.state(),
                    healthy: health.map(|(_, h)| h),
                    checked_at: health.map(|(t, _)| t),
                }
            })
            .collect()
    }
}

fn classify_and_record(
    breaker: &CircuitBreaker,
    service: &str,
    called: Result<OutboundResponse, PayBridgeError>,
    elapsed: Duration,
) -> Result<OutboundResponse, PayBridgeError> {
    match called {
        Ok(response) if response.is_transient_failure() => {
            breaker.record_result(true, elapsed);
            Err(PayBridgeError::DispatchTransient {
                service: service.to_string(),
                message: format!("transient status {}", response.status_code),
            })
        }
        Ok(response) if response.is_permanent_failure() => {
            breaker.record_result(true, elapsed);
            Err(PayBridgeError::DispatchPermanent {
                service: service.to_string(),
                message: format!("permanent status {}", response.status_code),
            })
        }
        Ok(response) => {
            breaker.record_result(false, elapsed);
            Ok(response)
        }
        Err(err @ PayBridgeError::DispatchTransient { .. }) | Err(err @ PayBridgeError::TimedOut { .. }) => {
            breaker.record_result(true, elapsed);
            Err(err)
        }
        Err(err) => {
            breaker.record_result(true, elapsed);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc as StdArc;

    struct FlakyConnector {
        calls: StdArc<AtomicU32>,
        fail_first_n: u32,
    }

    #[async_trait]
    impl OutboundConnector for FlakyConnector {
        fn service_name(&self) -> &str {
            "clearing"
        }

        async fn call(&self, _tenant_id: &str, _request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(PayBridgeError::DispatchTransient { service: "clearing".into(), message: "connect reset".into() });
            }
            Ok(OutboundResponse { status_code: 200, body: serde_json::json!({"status": "SUCCESS"}) })
        }
    }

    struct AlwaysFailConnector;

    #[async_trait]
    impl OutboundConnector for AlwaysFailConnector {
        fn service_name(&self) -> &str {
            "clearing"
        }

        async fn call(&self, _tenant_id: &str, _request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError> {
            Ok(OutboundResponse { status_code: 500, body: serde_json::json!({}) })
        }
    }

    fn ctx() -> FlowContext {
        FlowContext::new("M1", crate::types::PolicyCoordinate::new(crate::types::TenantId::from("T1"), crate::types::Direction::Request))
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds_and_keeps_circuit_closed() {
        let dispatcher = ResilientDispatcher::new();
        dispatcher.set_default_policy(
            "clearing",
            ResiliencePolicy { retry: RetryConfig { max_attempts: 3, base_wait: Duration::from_millis(1), ..Default::default() }, ..Default::default() },
        );
        let connector = FlakyConnector { calls: StdArc::new(AtomicU32::new(0)), fail_first_n: 1 };
        let response = dispatcher.dispatch(&ctx(), &connector, OutboundRequest::new(serde_json::json!({}))).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(dispatcher.service_health_status("T1")[0].circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn circuit_opens_after_enough_failures_and_next_call_short_circuits() {
        let dispatcher = ResilientDispatcher::new();
        dispatcher.set_default_policy(
            "clearing",
            ResiliencePolicy {
                circuit_breaker: CircuitBreakerConfig { window_size: 10, minimum_calls: 10, failure_rate_threshold: 0.5, ..CircuitBreakerConfig::default() },
                retry: RetryConfig { max_attempts: 1, ..Default::default() },
                ..Default::default()
            },
        );
        let connector = AlwaysFailConnector;
        for _ in 0..10 {
            let _ = dispatcher.dispatch(&ctx(), &connector, OutboundRequest::new(serde_json::json!({}))).await;
        }
        let status = dispatcher.service_health_status("T1");
        assert_eq!(status[0].circuit_state, CircuitState::Open);

        let response = dispatcher.dispatch(&ctx(), &connector, OutboundRequest::new(serde_json::json!({}))).await.unwrap();
        assert_eq!(response.status_code, 503);
    }

    #[tokio::test]
    async fn cancelled_flow_never_calls_connector() {
        let dispatcher = ResilientDispatcher::new();
        let flow = ctx();
        flow.cancel();
        let connector = AlwaysFailConnector;
        let result = dispatcher.dispatch(&flow, &connector, OutboundRequest::new(serde_json::json!({}))).await;
        assert!(matches!(result, Err(PayBridgeError::Cancelled)));
    }
}
