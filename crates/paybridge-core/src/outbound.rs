//! The abstraction the resilient dispatcher (component F) drives: a single
//! outbound call to a clearing system, fraud engine, or other bank service.
//! Concrete implementations (mock fixtures, HTTP clients) live in
//! `paybridge-adapters`; this crate only depends on the trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PayBridgeError;
use crate::types::AuthConfig;

/// One call's worth of request data, already mapped to the downstream shape.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub body: Value,
    pub headers: BTreeMap<String, String>,
    pub auth: Option<AuthConfig>,
}

impl OutboundRequest {
    pub fn new(body: Value) -> Self {
        Self { body, headers: BTreeMap::new(), auth: None }
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }
}

#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status_code: u16,
    pub body: Value,
}

impl OutboundResponse {
    pub fn is_transient_failure(&self) -> bool {
        self.status_code >= 500 || matches!(self.status_code, 408 | 425 | 429)
    }

    pub fn is_permanent_failure(&self) -> bool {
        (400..500).contains(&self.status_code) && !self.is_transient_failure()
    }
}

/// A single outbound collaborator: a clearing-system endpoint, a fraud
/// engine, or any other bank service the dispatcher fronts. Implementations
/// must be cancellation-safe: dropping the future mid-call must not leak
/// resources (§5).
#[async_trait]
pub trait OutboundConnector: Send + Sync {
    /// Stable name used to key the per-(serviceName, tenantId) resilience
    /// registry (§4.F) and the health-check surface (§6.1).
    fn service_name(&self) -> &str;

    async fn call(&self, tenant_id: &str, request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError>;

    /// Optional lightweight liveness probe; the default assumes healthy,
    /// matching connectors with no separate health endpoint.
    async fn health_check(&self, _tenant_id: &str) -> Result<bool, PayBridgeError> {
        Ok(true)
    }
}
