//! Connector adapters for the payment middleware: HTTP-backed
//! [`paybridge_core::OutboundConnector`] and
//! [`paybridge_core::WebhookTransport`] implementations, plus deterministic
//! fixtures for local development and testing.

#![deny(unsafe_code)]

mod auth;
mod fixtures;
mod http;
mod webhook;

pub use auth::{build_auth_headers, OAuth2TokenCache};
pub use fixtures::{AlwaysApproveFraudConnector, AlwaysFailConnector, EchoClearingConnector};
pub use http::HttpOutboundConnector;
pub use webhook::ReqwestWebhookTransport;
