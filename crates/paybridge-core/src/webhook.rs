//! The webhook delivery engine (component G): delivers an asynchronously
//! emitted response to a tenant-configured URL with bounded retry and
//! durable status (§4.G).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PayBridgeError;
use crate::types::{TenantId, WebhookDelivery, WebhookResult, WebhookStatus};

/// A single webhook HTTP attempt, decoupled from the transport so the
/// engine can be tested without a bound socket (§4.H test-tooling note).
/// Implemented for real delivery by `paybridge-adapters`.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &str, payload: &Value, headers: &BTreeMap<String, String>) -> Result<u16, PayBridgeError>;
}

/// Validates a webhook target URL: scheme must be http/https and a host
/// must be present (§4.G). Private-network hosts are accepted but logged.
pub fn validate_url(url: &str) -> Result<(), PayBridgeError> {
    let parsed = url::Url::parse(url).map_err(|e| PayBridgeError::Validation(format!("invalid webhook URL '{url}': {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(PayBridgeError::Validation(format!("webhook URL scheme must be http or https, got '{}'", parsed.scheme())));
    }
    let host = parsed.host_str().ok_or_else(|| PayBridgeError::Validation(format!("webhook URL '{url}' has no host")))?;
    if is_private_host(host) {
        warn!(url, "webhook target resolves to a private-network host");
    }
    Ok(())
}

fn is_private_host(host: &str) -> bool {
    host == "localhost"
        || host.starts_with("127.")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || host.starts_with("172.16.")
}

fn mandatory_headers(correlation_id: &str, tenant_id: &str, message_type: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("X-Correlation-ID".to_string(), correlation_id.to_string());
    headers.insert("X-Tenant-ID".to_string(), tenant_id.to_string());
    headers.insert("X-Message-Type".to_string(), message_type.to_string());
    headers.insert("X-Timestamp".to_string(), Utc::now().to_rfc3339());
    headers
}

/// Merges tenant-provided headers without allowing them to override the
/// mandatory set (§4.G).
fn merge_headers(mandatory: BTreeMap<String, String>, custom: BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = custom;
    for (key, value) in mandatory {
        merged.insert(key, value);
    }
    merged
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || matches!(status, 408 | 425 | 429)
}

/// Delivers responses asynchronously, tracking durable per-correlation
/// status and a bounded per-tenant history (§4.G, §5 "webhook status map:
/// shared; keyed by correlationId").
pub struct WebhookEngine {
    transport: Arc<dyn WebhookTransport>,
    deliveries: DashMap<String, WebhookDelivery>,
    history: DashMap<TenantId, Vec<String>>,
    max_history_per_tenant: usize,
}

impl WebhookEngine {
    pub fn new(transport: Arc<dyn WebhookTransport>) -> Self {
        Self {
            transport,
            deliveries: DashMap::new(),
            history: DashMap::new(),
            max_history_per_tenant: 100,
        }
    }

    pub fn with_max_history(mut self, max_history_per_tenant: usize) -> Self {
        self.max_history_per_tenant = max_history_per_tenant;
        self
    }

    /// `deliver(url, payload, headers, tenantId, messageType, correlationId,
    /// maxAttempts, baseDelay) → eventual WebhookDeliveryResult` (§4.G).
    /// Drives the fixed-delay retry ladder to completion before returning —
    /// callers that want fire-and-forget semantics should spawn this.
    #[allow(clippy::too_many_arguments)]
    pub async fn deliver(
        &self,
        url: String,
        payload: Value,
        custom_headers: BTreeMap<String, String>,
        tenant_id: TenantId,
        message_type: String,
        correlation_id: String,
        max_attempts: u32,
        base_delay: Duration,
    ) -> Result<WebhookResult, PayBridgeError> {
        validate_url(&url)?;

        let headers = merge_headers(mandatory_headers(&correlation_id, tenant_id.as_str(), &message_type), custom_headers);

        let mut delivery = WebhookDelivery {
            correlation_id: correlation_id.clone(),
            target_url: url.clone(),
            payload: payload.clone(),
            headers: headers.clone(),
            tenant_id: tenant_id.clone(),
            message_type: message_type.clone(),
            status: WebhookStatus::Delivering,
            attempt: 0,
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            result: None,
        };
        self.deliveries.insert(correlation_id.clone(), delivery.clone());

        let mut last_status_code: Option<u16> = None;
        let mut last_error: Option<String> = None;

        for attempt in 1..=max_attempts.max(1) {
            delivery.attempt = attempt;
            delivery.status = if attempt == 1 { WebhookStatus::Delivering } else { WebhookStatus::Retrying };
            self.deliveries.insert(correlation_id.clone(), delivery.clone());

            match self.transport.post(&url, &payload, &headers).await {
                Ok(status_code) if (200..300).contains(&status_code) => {
                    debug!(correlation_id, attempt, status_code, "webhook delivered");
                    let result = WebhookResult { success: true, attempt, last_status_code: Some(status_code), last_error: None, completed_at: Utc::now() };
                    delivery.status = WebhookStatus::Delivered;
                    delivery.result = Some(result.clone());
                    self.deliveries.insert(correlation_id.clone(), delivery);
                    self.record_history(&tenant_id, &correlation_id);
                    return Ok(result);
                }
                Ok(status_code) if is_retryable_status(status_code) => {
                    last_status_code = Some(status_code);
                    last_error = None;
                }
                Ok(status_code) => {
                    warn!(correlation_id, attempt, status_code, "webhook delivery terminal failure");
                    let result = WebhookResult { success: false, attempt, last_status_code: Some(status_code), last_error: None, completed_at: Utc::now() };
                    delivery.status = WebhookStatus::Failed;
                    delivery.result = Some(result.clone());
                    self.deliveries.insert(correlation_id.clone(), delivery);
                    self.record_history(&tenant_id, &correlation_id);
                    return Ok(result);
                }
                Err(err) => {
                    last_status_code = None;
                    last_error = Some(err.to_string());
                }
            }

            if attempt < max_attempts {
                warn!(correlation_id, attempt, max_attempts, ?base_delay, "webhook delivery attempt failed, retrying after fixed delay");
                tokio::time::sleep(base_delay).await;
            }
        }

        warn!(correlation_id, max_attempts, "webhook delivery given up after exhausting retry ladder");
        let result = WebhookResult {
            success: false,
            attempt: max_attempts,
            last_status_code,
            last_error: last_error.or_else(|| Some("exhausted retry attempts".to_string())),
            completed_at: Utc::now(),
        };
        delivery.status = WebhookStatus::GivenUp;
        delivery.result = Some(result.clone());
        self.deliveries.insert(correlation_id.clone(), delivery);
        self.record_history(&tenant_id, &correlation_id);
        Ok(result)
    }

    fn record_history(&self, tenant_id: &TenantId, correlation_id: &str) {
        let mut entry = self.history.entry(tenant_id.clone()).or_default();
        entry.push(correlation_id.to_string());
        let overflow = entry.len().saturating_sub(self.max_history_per_tenant);
        if overflow > 0 {
            entry.drain(0..overflow);
        }
    }

    /// Status queryable by correlationId (§4.G).
    pub fn status(&self, correlation_id: &str) -> Option<WebhookDelivery> {
        self.deliveries.get(correlation_id).map(|entry| entry.clone())
    }

    /// Last N results for a tenant, indexable by messageType (§4.G).
    pub fn history(&self, tenant_id: &TenantId, message_type: Option<&str>) -> Vec<WebhookDelivery> {
        let ids = self.history.get(tenant_id).map(|v| v.clone()).unwrap_or_default();
        ids.iter()
            .rev()
            .filter_map(|id| self.deliveries.get(id).map(|entry| entry.clone()))
            .filter(|delivery| message_type.map(|mt| delivery.message_type == mt).unwrap_or(true))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedTransport {
        responses: Vec<Result<u16, PayBridgeError>>,
        calls: std::sync::Mutex<u32>,
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        async fn post(&self, _url: &str, _payload: &Value, _headers: &BTreeMap<String, String>) -> Result<u16, PayBridgeError> {
            let mut calls = self.calls.lock().unwrap();
            let index = *calls as usize;
            *calls += 1;
            self.responses.get(index).cloned().unwrap_or(Ok(500))
        }
    }

    fn tenant() -> TenantId {
        TenantId::from("T1")
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let transport = Arc::new(ScriptedTransport { responses: vec![Ok(200)], calls: std::sync::Mutex::new(0) });
        let engine = WebhookEngine::new(transport);
        let result = engine
            .deliver(
                "https://example.com/hook".to_string(),
                serde_json::json!({"ok": true}),
                BTreeMap::new(),
                tenant(),
                "pain.002".to_string(),
                "corr-1".to_string(),
                3,
                Duration::from_millis(1),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.attempt, 1);
    }

    #[tokio::test]
    async fn retries_on_5xx_then_succeeds() {
        let transport = Arc::new(ScriptedTransport { responses: vec![Ok(503), Ok(200)], calls: std::sync::Mutex::new(0) });
        let engine = WebhookEngine::new(transport);
        let result = engine
            .deliver(
                "https://example.com/hook".to_string(),
                serde_json::json!({}),
                BTreeMap::new(),
                tenant(),
                "pain.002".to_string(),
                "corr-2".to_string(),
                3,
                Duration::from_millis(1),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.attempt, 2);
    }

    #[tokio::test]
    async fn terminal_4xx_does_not_retry() {
        let transport = Arc::new(ScriptedTransport { responses: vec![Ok(404)], calls: std::sync::Mutex::new(0) });
        let engine = WebhookEngine::new(transport);
        let result = engine
            .deliver(
                "https://example.com/hook".to_string(),
                serde_json::json!({}),
                BTreeMap::new(),
                tenant(),
                "pain.002".to_string(),
                "corr-3".to_string(),
                5,
                Duration::from_millis(1),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.attempt, 1);
        assert_eq!(engine.status("corr-3").unwrap().status, WebhookStatus::Failed);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_attempts() {
        let transport = Arc::new(ScriptedTransport { responses: vec![Ok(503), Ok(503), Ok(503)], calls: std::sync::Mutex::new(0) });
        let engine = WebhookEngine::new(transport);
        let result = engine
            .deliver(
                "https://example.com/hook".to_string(),
                serde_json::json!({}),
                BTreeMap::new(),
                tenant(),
                "pain.002".to_string(),
                "corr-4".to_string(),
                3,
                Duration::from_millis(1),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(engine.status("corr-4").unwrap().status, WebhookStatus::GivenUp);
    }

    #[tokio::test]
    async fn custom_headers_cannot_override_mandatory_ones() {
        let mut custom = BTreeMap::new();
        custom.insert("X-Tenant-ID".to_string(), "SPOOFED".to_string());
        let merged = merge_headers(mandatory_headers("corr-5", "T1", "pain.002"), custom);
        assert_eq!(merged.get("X-Tenant-ID"), Some(&"T1".to_string()));
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(validate_url("ftp://example.com").is_err());
    }

    #[test]
    fn rejects_url_without_host() {
        assert!(validate_url("https://").is_err());
    }
}
