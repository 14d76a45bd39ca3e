//! Deterministic connector fixtures for local development and integration
//! tests that should not depend on a live clearing system or fraud engine.

use async_trait::async_trait;
use paybridge_core::{OutboundConnector, OutboundRequest, OutboundResponse, PayBridgeError};
use serde_json::json;

/// Always approves with a low risk score; a stand-in fraud engine for demo
/// environments and integration tests.
#[derive(Debug, Clone, Default)]
pub struct AlwaysApproveFraudConnector;

#[async_trait]
impl OutboundConnector for AlwaysApproveFraudConnector {
    fn service_name(&self) -> &str {
        "fraud-engine"
    }

    async fn call(&self, _tenant_id: &str, _request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError> {
        Ok(OutboundResponse {
            status_code: 200,
            body: json!({"decision": "APPROVE", "riskLevel": "LOW", "riskScore": 0.05, "reason": "fixture: always approve"}),
        })
    }
}

/// Echoes the mapped request back as a synthetic `SUCCESS` clearing
/// response, useful for exercising the orchestrator end to end without a
/// live clearing system.
#[derive(Debug, Clone, Default)]
pub struct EchoClearingConnector;

#[async_trait]
impl OutboundConnector for EchoClearingConnector {
    fn service_name(&self) -> &str {
        "clearing"
    }

    async fn call(&self, _tenant_id: &str, request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError> {
        Ok(OutboundResponse {
            status_code: 200,
            body: json!({
                "status": "SUCCESS",
                "responseCode": "200",
                "responseMessage": "accepted",
                "payload": request.body,
                "processingTimeMs": 1,
            }),
        })
    }
}

/// Deterministic failing connector for chaos/resilience testing — every
/// call returns the configured transient error.
#[derive(Debug, Clone)]
pub struct AlwaysFailConnector {
    service_name: String,
    message: String,
}

impl AlwaysFailConnector {
    pub fn new(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { service_name: service_name.into(), message: message.into() }
    }
}

#[async_trait]
impl OutboundConnector for AlwaysFailConnector {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn call(&self, _tenant_id: &str, _request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError> {
        Err(PayBridgeError::DispatchTransient { service: self.service_name.clone(), message: self.message.clone() })
    }

    async fn health_check(&self, _tenant_id: &str) -> Result<bool, PayBridgeError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_connector_wraps_the_request_body_as_payload() {
        let connector = EchoClearingConnector;
        let response = connector.call("T1", OutboundRequest::new(json!({"x": 1}))).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body["payload"], json!({"x": 1}));
    }

    #[tokio::test]
    async fn always_fail_connector_returns_transient_error() {
        let connector = AlwaysFailConnector::new("clearing", "connect reset");
        let result = connector.call("T1", OutboundRequest::new(json!({}))).await;
        assert!(matches!(result, Err(PayBridgeError::DispatchTransient { .. })));
    }
}
