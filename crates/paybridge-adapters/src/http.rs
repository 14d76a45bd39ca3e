//! HTTP-backed [`OutboundConnector`]: posts the mapped payload to a
//! clearing-system or fraud-engine endpoint and folds the response into the
//! shape the resilient dispatcher classifies (§6 "Outbound (to clearing
//! systems)" / "Outbound (to fraud engine)").

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paybridge_core::{OutboundConnector, OutboundRequest, OutboundResponse, PayBridgeError};
use serde_json::Value;
use tracing::warn;

use crate::auth::{build_auth_headers, OAuth2TokenCache};

/// One HTTP collaborator (a clearing-system endpoint or a fraud engine),
/// identified by the `service_name` the resilience registry keys on (§4.F).
pub struct HttpOutboundConnector {
    service_name: String,
    endpoint: String,
    client: reqwest::Client,
    oauth_cache: Arc<OAuth2TokenCache>,
}

impl HttpOutboundConnector {
    pub fn new(service_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with a fixed timeout"),
            oauth_cache: Arc::new(OAuth2TokenCache::new()),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Interprets the standard outbound response envelope
    /// `{status, responseCode, responseMessage, payload, processingTimeMs, timestamp}`
    /// (§6), falling back to the HTTP status line when the body doesn't
    /// carry one.
    fn fold_response(&self, http_status: u16, body: Value) -> OutboundResponse {
        let status_code = body
            .get("responseCode")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(http_status);
        OutboundResponse { status_code, body }
    }
}

#[async_trait]
impl OutboundConnector for HttpOutboundConnector {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn call(&self, tenant_id: &str, request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError> {
        let mut builder = self.client.post(&self.endpoint).json(&request.body);

        if let Some(auth) = &request.auth {
            let headers = build_auth_headers(&self.client, &self.oauth_cache, auth, None).await?;
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        builder = builder.header("X-Tenant-ID", tenant_id);

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                PayBridgeError::TimedOut { elapsed_ms: 30_000 }
            } else {
                PayBridgeError::DispatchTransient { service: self.service_name.clone(), message: e.to_string() }
            }
        })?;

        let http_status = response.status().as_u16();
        let body: Value = response.json().await.unwrap_or_else(|e| {
            warn!(service = %self.service_name, error = %e, "outbound response body was not valid JSON");
            serde_json::json!({"raw": true})
        });

        Ok(self.fold_response(http_status, body))
    }

    async fn health_check(&self, _tenant_id: &str) -> Result<bool, PayBridgeError> {
        let url = format!("{}/health", self.endpoint.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                warn!(service = %self.service_name, error = %e, "health check failed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_response_prefers_body_response_code_over_http_status() {
        let connector = HttpOutboundConnector::new("clearing", "https://example.com");
        let response = connector.fold_response(200, serde_json::json!({"responseCode": "503"}));
        assert_eq!(response.status_code, 503);
    }

    #[test]
    fn fold_response_falls_back_to_http_status_without_body_code() {
        let connector = HttpOutboundConnector::new("clearing", "https://example.com");
        let response = connector.fold_response(404, serde_json::json!({}));
        assert_eq!(response.status_code, 404);
    }
}
