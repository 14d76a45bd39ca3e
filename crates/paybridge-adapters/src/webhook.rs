//! HTTP-backed [`WebhookTransport`]: delivers one webhook attempt, leaving
//! the retry ladder and status bookkeeping to
//! [`paybridge_core::webhook::WebhookEngine`] (§4.G).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use paybridge_core::{PayBridgeError, WebhookTransport};
use serde_json::Value;

pub struct ReqwestWebhookTransport {
    client: reqwest::Client,
}

impl ReqwestWebhookTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client builds with a fixed timeout"),
        }
    }
}

impl Default for ReqwestWebhookTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for ReqwestWebhookTransport {
    async fn post(&self, url: &str, payload: &Value, headers: &BTreeMap<String, String>) -> Result<u16, PayBridgeError> {
        let mut builder = self.client.post(url).json(payload);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| PayBridgeError::DispatchTransient { service: "webhook".to_string(), message: e.to_string() })?;
        Ok(response.status().as_u16())
    }
}
