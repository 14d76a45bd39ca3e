#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use paybridge_adapters::{AlwaysApproveFraudConnector, EchoClearingConnector, HttpOutboundConnector, ReqwestWebhookTransport};
use paybridge_core::{
    AuditEntry, ClearingSystemCode, ConfigResolver, FlowOrchestrator, FlowOutcome, FraudAssessmentStore, FraudGate,
    IngressRequest, LedgerStorageConfig, LocalInstrumentCode, MappingEngine, OutboundConnector, PayBridgeError,
    PaymentType, PersistentLedger, ResilientDispatcher, ResponseMode, ServiceHealthStatus, TenantId, WebhookDelivery,
    WebhookEngine, WebhookTarget, WebhookTransport, WireFormat,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

/// How the service locates its clearing-system and fraud-engine
/// collaborators. Leaving either endpoint unset falls back to the
/// deterministic fixtures from `paybridge-adapters`, making the service
/// runnable with no external dependencies for local development (§4.F,
/// §6 "Outbound").
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub ledger_storage: LedgerStorageConfig,
    pub clearing_endpoint: Option<String>,
    pub fraud_endpoint: Option<String>,
}

#[derive(Clone)]
pub struct ServiceState {
    orchestrator: FlowOrchestrator,
    dispatcher: Arc<ResilientDispatcher>,
    webhook_engine: Arc<WebhookEngine>,
    ledger: Arc<Mutex<PersistentLedger>>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let resolver = Arc::new(ConfigResolver::new());
        let mapping_engine = Arc::new(MappingEngine::new());

        let clearing_connector: Arc<dyn OutboundConnector> = match &config.clearing_endpoint {
            Some(endpoint) => Arc::new(HttpOutboundConnector::new("clearing", endpoint.clone())),
            None => Arc::new(EchoClearingConnector),
        };
        let fraud_connector: Arc<dyn OutboundConnector> = match &config.fraud_endpoint {
            Some(endpoint) => Arc::new(HttpOutboundConnector::new("fraud-engine", endpoint.clone())),
            None => Arc::new(AlwaysApproveFraudConnector),
        };

        let fraud_dispatcher = Arc::new(ResilientDispatcher::new());
        let fraud_gate = Arc::new(FraudGate::new(fraud_connector, fraud_dispatcher));
        let fraud_store = Arc::new(FraudAssessmentStore::new());

        let dispatcher = Arc::new(ResilientDispatcher::new());
        let webhook_transport: Arc<dyn WebhookTransport> = Arc::new(ReqwestWebhookTransport::new());
        let webhook_engine = Arc::new(WebhookEngine::new(webhook_transport));

        let ledger = Arc::new(Mutex::new(PersistentLedger::bootstrap(config.ledger_storage).await.map_err(ServiceError::Core)?));

        let orchestrator = FlowOrchestrator::new(
            resolver,
            mapping_engine,
            fraud_gate,
            fraud_store,
            clearing_connector,
            dispatcher.clone(),
            webhook_engine.clone(),
            ledger.clone(),
        );

        Ok(Self { orchestrator, dispatcher, webhook_engine, ledger })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/messages", post(handle_message))
        .route("/v1/flows/:correlation_id", get(flow_audit_trail))
        .route("/v1/webhooks/:correlation_id", get(webhook_status))
        .route("/v1/services/:service_name/health", get(service_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] PayBridgeError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] PayBridgeError),
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self::Http { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

/// Maps the dispatcher-internal [`PayBridgeError`] kinds to HTTP status
/// codes for the narrow cases that reach this boundary directly (request
/// decoding failures never hit the orchestrator's own fail-safe handling).
fn status_for(err: &PayBridgeError) -> StatusCode {
    use paybridge_core::ErrorKind;
    match err.kind() {
        ErrorKind::Validation | ErrorKind::ConfigurationMissing => StatusCode::BAD_REQUEST,
        ErrorKind::Duplicate => StatusCode::CONFLICT,
        ErrorKind::CircuitOpen | ErrorKind::Saturated | ErrorKind::TimedOut => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => (status, Json(serde_json::json!({"error": message}))).into_response(),
            ApiError::Core(err) => (status_for(&err), Json(serde_json::json!({"error": err.to_string()}))).into_response(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    ledger_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    let ledger = state.ledger.lock().await;
    Json(HealthResponse { status: "ok", service: "paybridge-service", ledger_backend: ledger.backend_label() })
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum WireFormatDto {
    Json,
    Xml,
}

impl From<WireFormatDto> for WireFormat {
    fn from(value: WireFormatDto) -> Self {
        match value {
            WireFormatDto::Json => WireFormat::Json,
            WireFormatDto::Xml => WireFormat::Xml,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum ResponseModeDto {
    Sync,
    Async,
    Webhook,
}

#[derive(Debug, Clone, Deserialize)]
struct WebhookTargetDto {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

/// The ingress envelope from §6 "Inbound (from clients)": the wire payload
/// plus the routing coordinate and delivery preference.
#[derive(Debug, Clone, Deserialize)]
struct IngressEnvelope {
    kind: String,
    format: WireFormatDto,
    body: String,
    tenant_id: String,
    payment_type: Option<String>,
    local_instrument: Option<String>,
    clearing_system: Option<String>,
    #[serde(default = "default_response_mode")]
    response_mode: ResponseModeDto,
    webhook: Option<WebhookTargetDto>,
}

fn default_response_mode() -> ResponseModeDto {
    ResponseModeDto::Sync
}

impl TryFrom<IngressEnvelope> for IngressRequest {
    type Error = ApiError;

    fn try_from(envelope: IngressEnvelope) -> Result<Self, ApiError> {
        let (response_mode, webhook) = match envelope.response_mode {
            ResponseModeDto::Sync => (ResponseMode::Sync, None),
            ResponseModeDto::Async | ResponseModeDto::Webhook => {
                let target = envelope
                    .webhook
                    .ok_or_else(|| ApiError::bad_request("ASYNC/WEBHOOK responseMode requires a webhook target"))?;
                (
                    ResponseMode::Async,
                    Some(WebhookTarget {
                        url: target.url,
                        headers: target.headers,
                        max_attempts: target.max_attempts,
                        base_delay: Duration::from_millis(target.base_delay_ms),
                    }),
                )
            }
        };

        let mut request = IngressRequest::new(envelope.kind, envelope.format.into(), envelope.body, TenantId::from(envelope.tenant_id.as_str()));
        request.payment_type = envelope.payment_type.map(|v| PaymentType::from(v.as_str()));
        request.local_instrument = envelope.local_instrument.map(|v| LocalInstrumentCode::from(v.as_str()));
        request.clearing_system = envelope.clearing_system.map(|v| ClearingSystemCode::from(v.as_str()));
        request.response_mode = response_mode;
        request.webhook = webhook;
        Ok(request)
    }
}

async fn handle_message(State(state): State<ServiceState>, Json(envelope): Json<IngressEnvelope>) -> Result<Json<FlowOutcome>, ApiError> {
    let request: IngressRequest = envelope.try_into()?;
    Ok(Json(state.orchestrator.handle(request).await))
}

async fn flow_audit_trail(Path(correlation_id): Path<String>, State(state): State<ServiceState>) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let ledger = state.ledger.lock().await;
    let entries: Vec<AuditEntry> = ledger.entries_for_correlation(&correlation_id).into_iter().cloned().collect();
    if entries.is_empty() {
        return Err(ApiError::not_found(format!("no audit trail for correlation '{correlation_id}'")));
    }
    Ok(Json(entries))
}

async fn webhook_status(Path(correlation_id): Path<String>, State(state): State<ServiceState>) -> Result<Json<WebhookDelivery>, ApiError> {
    state
        .webhook_engine
        .status(&correlation_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no webhook delivery for correlation '{correlation_id}'")))
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceHealthQuery {
    tenant_id: String,
}

async fn service_health(
    Path(service_name): Path<String>,
    State(state): State<ServiceState>,
    Query(query): Query<ServiceHealthQuery>,
) -> Result<Json<ServiceHealthStatus>, ApiError> {
    state
        .dispatcher
        .service_health_status(&query.tenant_id)
        .into_iter()
        .find(|status| status.service == service_name)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no resilience registry entry for service '{service_name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn state() -> ServiceState {
        ServiceState::bootstrap(ServiceConfig::default()).await.unwrap()
    }

    fn pain001_payload(end_to_end_id: &str) -> serde_json::Value {
        serde_json::json!({
            "kind": "pain.001",
            "format": "JSON",
            "body": format!(r#"{{"pain.001": {{"GrpHdr": {{"MsgId": "M1"}}, "PmtId": {{"EndToEndId": "{end_to_end_id}"}}}}}}"#),
            "tenant_id": "T1",
            "payment_type": "SEPA",
        })
        .to_string()
    }

    #[tokio::test]
    async fn health_endpoint_reports_memory_backend() {
        let app = build_router(state().await);
        let response = app
            .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.get("ledger_backend").and_then(|v| v.as_str()), Some("memory"));
    }

    #[tokio::test]
    async fn ingress_endpoint_emits_sync_ack_and_records_an_audit_trail() {
        let app = build_router(state().await);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/messages")
                    .header("content-type", "application/json")
                    .body(Body::from(pain001_payload("E2E-1")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let outcome: FlowOutcome = serde_json::from_slice(&bytes).unwrap();
        let ack = outcome.response.as_ref().expect("sync happy path emits a pain.002 ack");
        assert_eq!(ack.pointer("/OrgnlGrpInfAndSts/GrpSts"), Some(&serde_json::json!("ACSC")));
        assert_eq!(ack.pointer("/OrgnlGrpInfAndSts/StsRsnInf/Rsn/Cd"), Some(&serde_json::json!("G000")));
        assert_eq!(ack.pointer("/OrgnlGrpInfAndSts/OrgnlMsgId"), Some(&serde_json::json!("M1")));

        let trail_response = app
            .oneshot(Request::builder().uri(format!("/v1/flows/{}", outcome.correlation_id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(trail_response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_webhook_correlation_is_not_found() {
        let app = build_router(state().await);
        let response = app
            .oneshot(Request::builder().uri("/v1/webhooks/does-not-exist").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
