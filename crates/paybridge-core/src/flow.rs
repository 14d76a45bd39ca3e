//! The Flow Orchestrator (component E): drives the request/response state
//! machine that ties every other component together (§4.E). Each ingress
//! message is handled on its own task; the orchestrator exclusively owns
//! the [`FlowContext`] and the in-flight [`Message`] for the duration of the
//! flow (§5).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ConfigResolver;
use crate::error::{ErrorKind, PayBridgeError, StatusReason};
use crate::fraud::FraudGate;
use crate::iso20022::{Canonicalizer, WireFormat};
use crate::ledger::{FraudAssessmentStore, PersistentLedger};
use crate::mapping::MappingEngine;
use crate::outbound::{OutboundConnector, OutboundRequest};
use crate::resilience::ResilientDispatcher;
use crate::types::{
    ClearingSystemCode, Direction, FlowContext, FraudDecision, LocalInstrumentCode, Message, PaymentType,
    PolicyCoordinate, TenantId,
};
use crate::webhook::WebhookEngine;

/// Every stage the orchestrator's state machine can occupy (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStage {
    Ingress,
    Parsed,
    PolicyResolved,
    FraudChecked,
    Mapped,
    Dispatched,
    ClearingAck,
    ResponseMapped,
    Emitted,
    FlowRejected,
    FlowPending,
    FallbackEmitted,
}

/// Whether a flow dispatches to the clearing system, acknowledges a
/// clearing-initiated message directly, or only delivers a notification
/// (§4.E "sibling flows").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Client-initiated: mapped to a request kind, dispatched to the
    /// clearing system, and the response is mapped back to a client ack.
    Outbound,
    /// Clearing-initiated message that is acknowledged directly, with no
    /// outbound dispatch (e.g. `pacs.008` inbound → `pacs.002`).
    InboundAck,
    /// Clearing-initiated notification with no ack emitted back (e.g.
    /// `pacs.004`, `pacs.002`, `camt.054`, `camt.029` inbound).
    InboundNotify,
}

/// Describes one (ingressKind, requestKind, responseKind, clientAckKind)
/// sibling flow (§4.E).
#[derive(Debug, Clone, Copy)]
pub struct FlowSpec {
    pub ingress_kind: &'static str,
    pub kind: FlowKind,
    pub request_kind: Option<&'static str>,
    pub response_kind: Option<&'static str>,
    pub client_ack_kind: Option<&'static str>,
}

const FLOW_SPECS: &[FlowSpec] = &[
    FlowSpec {
        ingress_kind: "pain.001",
        kind: FlowKind::Outbound,
        request_kind: Some("pacs.008"),
        response_kind: Some("pacs.002"),
        client_ack_kind: Some("pain.002"),
    },
    FlowSpec {
        ingress_kind: "camt.055",
        kind: FlowKind::Outbound,
        request_kind: Some("pacs.007"),
        response_kind: Some("pacs.002"),
        client_ack_kind: Some("pacs.002"),
    },
    FlowSpec {
        ingress_kind: "camt.056",
        kind: FlowKind::Outbound,
        request_kind: Some("pacs.028"),
        response_kind: Some("pacs.002"),
        client_ack_kind: Some("pacs.028"),
    },
    FlowSpec {
        ingress_kind: "pacs.008",
        kind: FlowKind::InboundAck,
        request_kind: None,
        response_kind: None,
        client_ack_kind: Some("pacs.002"),
    },
    FlowSpec {
        ingress_kind: "pacs.004",
        kind: FlowKind::InboundNotify,
        request_kind: None,
        response_kind: None,
        client_ack_kind: None,
    },
    FlowSpec {
        ingress_kind: "pacs.002",
        kind: FlowKind::InboundNotify,
        request_kind: None,
        response_kind: None,
        client_ack_kind: None,
    },
    FlowSpec {
        ingress_kind: "camt.054",
        kind: FlowKind::InboundNotify,
        request_kind: None,
        response_kind: None,
        client_ack_kind: None,
    },
    FlowSpec {
        ingress_kind: "camt.029",
        kind: FlowKind::InboundNotify,
        request_kind: None,
        response_kind: None,
        client_ack_kind: None,
    },
];

pub fn lookup_flow_spec(ingress_kind: &str) -> Option<&'static FlowSpec> {
    FLOW_SPECS.iter().find(|spec| spec.ingress_kind == ingress_kind)
}

/// Sync returns the emitted message inline; async enqueues a
/// [`crate::webhook::WebhookEngine`] delivery (§4.E transition
/// RESPONSE_MAPPED→EMITTED).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Sync,
    Async,
}

#[derive(Debug, Clone)]
pub struct WebhookTarget {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// One ingress message plus the routing/delivery information the
/// orchestrator needs to drive it (§6.1 `POST /v1/messages`).
#[derive(Debug, Clone)]
pub struct IngressRequest {
    pub kind: String,
    pub format: WireFormat,
    pub body: String,
    pub tenant_id: TenantId,
    pub payment_type: Option<PaymentType>,
    pub local_instrument: Option<LocalInstrumentCode>,
    pub clearing_system: Option<ClearingSystemCode>,
    pub response_mode: ResponseMode,
    pub webhook: Option<WebhookTarget>,
}

impl IngressRequest {
    pub fn new(kind: impl Into<String>, format: WireFormat, body: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            kind: kind.into(),
            format,
            body: body.into(),
            tenant_id,
            payment_type: None,
            local_instrument: None,
            clearing_system: None,
            response_mode: ResponseMode::Sync,
            webhook: None,
        }
    }

    fn coordinate(&self) -> PolicyCoordinate {
        let mut coordinate = PolicyCoordinate::new(self.tenant_id.clone(), Direction::Request);
        if let Some(payment_type) = &self.payment_type {
            coordinate = coordinate.with_payment_type(payment_type.as_str());
        }
        if let Some(local_instrument) = &self.local_instrument {
            coordinate = coordinate.with_local_instrument(local_instrument.as_str());
        }
        if let Some(clearing_system) = &self.clearing_system {
            coordinate = coordinate.with_clearing_system(clearing_system.as_str());
        }
        coordinate
    }
}

/// What the orchestrator produced for one flow: a terminal stage, the
/// ISO 20022 status/reason pair when non-success, and either an inline
/// response or confirmation that a webhook was scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowOutcome {
    pub correlation_id: String,
    pub stage: FlowStage,
    pub status_reason: Option<StatusReason>,
    pub response_kind: Option<String>,
    pub response: Option<Value>,
    pub webhook_scheduled: bool,
}

impl FlowOutcome {
    fn terminal(ctx: &FlowContext, stage: FlowStage, status_reason: Option<StatusReason>) -> Self {
        Self {
            correlation_id: ctx.correlation_id.clone(),
            stage,
            status_reason,
            response_kind: None,
            response: None,
            webhook_scheduled: false,
        }
    }

    fn rejected_by(ctx: &FlowContext, err: &PayBridgeError) -> Self {
        let status_reason = err.to_status_reason();
        let stage = if matches!(err.kind(), ErrorKind::FraudReview) {
            FlowStage::FlowPending
        } else {
            FlowStage::FlowRejected
        };
        Self::terminal(ctx, stage, Some(status_reason))
    }
}

/// Bounds one in-flight (tenantId, messageId) pair, releasing it on drop so
/// a cancelled or panicking task never leaves the flow permanently stuck
/// (§5 "at-most-one-in-flight guarantee").
struct DuplicateGuard {
    key: (String, String),
    registry: Arc<dashmap::DashMap<(String, String), ()>>,
}

impl Drop for DuplicateGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}

/// Drives the request/response state machine of §4.E, owning the
/// duplicate-suppression registry and wiring every other component
/// together. Cheap to clone: every field is already reference-counted.
#[derive(Clone)]
pub struct FlowOrchestrator {
    resolver: Arc<ConfigResolver>,
    mapping_engine: Arc<MappingEngine>,
    canonicalizer: Canonicalizer,
    fraud_gate: Arc<FraudGate>,
    fraud_store: Arc<FraudAssessmentStore>,
    clearing_connector: Arc<dyn OutboundConnector>,
    dispatcher: Arc<ResilientDispatcher>,
    webhook_engine: Arc<WebhookEngine>,
    ledger: Arc<Mutex<PersistentLedger>>,
    in_flight: Arc<dashmap::DashMap<(String, String), ()>>,
}

impl FlowOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<ConfigResolver>,
        mapping_engine: Arc<MappingEngine>,
        fraud_gate: Arc<FraudGate>,
        fraud_store: Arc<FraudAssessmentStore>,
        clearing_connector: Arc<dyn OutboundConnector>,
        dispatcher: Arc<ResilientDispatcher>,
        webhook_engine: Arc<WebhookEngine>,
        ledger: Arc<Mutex<PersistentLedger>>,
    ) -> Self {
        Self {
            resolver,
            mapping_engine,
            canonicalizer: Canonicalizer::new(),
            fraud_gate,
            fraud_store,
            clearing_connector,
            dispatcher,
            webhook_engine,
            ledger,
            in_flight: Arc::new(dashmap::DashMap::new()),
        }
    }

    async fn audit(&self, ctx: &FlowContext, stage: FlowStage, status: &str, detail: Value) {
        let stage_name = format!("{stage:?}");
        let mut ledger = self.ledger.lock().await;
        if let Err(err) = ledger.append(&ctx.correlation_id, ctx.tenant_id.as_str(), &ctx.message_id, &stage_name, status, detail).await {
            warn!(correlation_id = %ctx.correlation_id, error = %err, "failed to append audit entry");
        }
    }

    fn acquire_slot(&self, tenant_id: &str, message_id: &str) -> Result<DuplicateGuard, PayBridgeError> {
        let key = (tenant_id.to_string(), message_id.to_string());
        if self.in_flight.insert(key.clone(), ()).is_some() {
            return Err(PayBridgeError::Duplicate { tenant_id: tenant_id.to_string(), message_id: message_id.to_string() });
        }
        Ok(DuplicateGuard { key, registry: self.in_flight.clone() })
    }

    /// Handles one ingress message end to end (§4.E). Always returns a
    /// [`FlowOutcome`] — every stage failure is caught, classified, and
    /// folded into the appropriate terminal stage rather than propagated.
    pub async fn handle(&self, request: IngressRequest) -> FlowOutcome {
        let coordinate = request.coordinate();
        let mut ctx = FlowContext::new("PENDING", coordinate);
        self.audit(&ctx, FlowStage::Ingress, "OK", Value::Null).await;

        let message = match self.canonicalizer.parse(&request.kind, request.format, &request.body) {
            Ok(message) => message,
            Err(err) => {
                warn!(correlation_id = %ctx.correlation_id, error = %err, "ingress parse failed");
                self.audit(&ctx, FlowStage::FlowRejected, "VALIDATION", Value::String(err.to_string())).await;
                return FlowOutcome::rejected_by(&ctx, &err);
            }
        };

        let validation = self.canonicalizer.validate(&message);
        if !validation.valid {
            let err = PayBridgeError::Validation(validation.errors.join("; "));
            self.audit(&ctx, FlowStage::FlowRejected, "VALIDATION", serde_json::json!({"errors": validation.errors})).await;
            return FlowOutcome::rejected_by(&ctx, &err);
        }

        ctx.message_id = extract_message_id(&message);

        let guard = match self.acquire_slot(ctx.tenant_id.as_str(), &ctx.message_id) {
            Ok(guard) => guard,
            Err(err) => {
                warn!(correlation_id = %ctx.correlation_id, tenant_id = %ctx.tenant_id, message_id = %ctx.message_id, "duplicate message rejected");
                self.audit(&ctx, FlowStage::FlowRejected, "DUPLICATE", Value::Null).await;
                return FlowOutcome::rejected_by(&ctx, &err);
            }
        };

        let outcome = self.handle_parsed(&mut ctx, request, message).await;
        drop(guard);
        outcome
    }

    async fn handle_parsed(&self, ctx: &mut FlowContext, request: IngressRequest, message: Message) -> FlowOutcome {
        self.audit(ctx, FlowStage::Parsed, "OK", Value::Null).await;

        let flow_spec = match lookup_flow_spec(&request.kind) {
            Some(spec) => *spec,
            None => {
                let err = PayBridgeError::Internal(format!("unsupported flow kind: {}", request.kind));
                self.audit(ctx, FlowStage::FlowRejected, "UNSUPPORTED_KIND", Value::Null).await;
                return FlowOutcome::rejected_by(ctx, &err);
            }
        };

        let auth = match self.resolver.resolve_auth(&ctx.coordinate) {
            Ok(auth) => Some(auth),
            Err(err) => {
                warn!(correlation_id = %ctx.correlation_id, error = %err, "no auth configuration resolved for coordinate, proceeding unauthenticated");
                None
            }
        };
        let request_mapping = self.resolver.effective_mapping(&ctx.coordinate, Direction::Request);
        self.audit(ctx, FlowStage::PolicyResolved, "OK", Value::Null).await;

        let assessment = self.fraud_gate.assess(ctx, &message).await;
        self.fraud_store.record(assessment.clone());

        match assessment.decision {
            FraudDecision::Reject => {
                let err = PayBridgeError::FraudRejected(assessment.reason.unwrap_or_else(|| "rejected".to_string()));
                self.audit(ctx, FlowStage::FlowRejected, "FRAUD_REJECT", Value::Null).await;
                return FlowOutcome::rejected_by(ctx, &err);
            }
            FraudDecision::ManualReview => {
                let err = PayBridgeError::FraudReview(assessment.reason.unwrap_or_else(|| "manual review required".to_string()));
                self.audit(ctx, FlowStage::FlowPending, "FRAUD_REVIEW", Value::Null).await;
                return FlowOutcome::rejected_by(ctx, &err);
            }
            FraudDecision::Approve => {
                self.audit(ctx, FlowStage::FraudChecked, "APPROVE", Value::Null).await;
            }
        }

        match flow_spec.kind {
            FlowKind::Outbound => self.handle_outbound(ctx, &request, &flow_spec, &message, request_mapping, auth).await,
            FlowKind::InboundAck => self.handle_inbound_ack(ctx, &request, &flow_spec, &message, request_mapping).await,
            FlowKind::InboundNotify => self.handle_inbound_notify(ctx, &request, &message).await,
        }
    }

    async fn handle_outbound(
        &self,
        ctx: &mut FlowContext,
        request: &IngressRequest,
        flow_spec: &FlowSpec,
        message: &Message,
        request_mapping: Option<crate::types::MappingDocument>,
        auth: Option<crate::types::AuthConfigRecord>,
    ) -> FlowOutcome {
        let request_kind = flow_spec.request_kind.expect("outbound flows declare a request kind");
        let mapped_body = match &request_mapping {
            Some(document) => match self.mapping_engine.apply(document, ctx.tenant_id.as_str(), &message.body) {
                Ok(body) => body,
                Err(err) => {
                    self.audit(ctx, FlowStage::FlowRejected, "MAPPING_FAILED", Value::Null).await;
                    return FlowOutcome::rejected_by(ctx, &err);
                }
            },
            None => match self.canonicalizer.transform(message, request_kind, ctx) {
                Some(transformed) => transformed.body,
                None => {
                    let err = PayBridgeError::MappingFailed {
                        document: format!("{}->{}", message.kind, request_kind),
                        reason: "no effective mapping document and no built-in transformation".to_string(),
                    };
                    self.audit(ctx, FlowStage::FlowRejected, "MAPPING_FAILED", Value::Null).await;
                    return FlowOutcome::rejected_by(ctx, &err);
                }
            },
        };
        self.audit(ctx, FlowStage::Mapped, "OK", Value::Null).await;

        let mut outbound_request = OutboundRequest::new(mapped_body);
        if let Some(auth) = auth {
            outbound_request = outbound_request.with_auth(auth.config);
        }

        let response = match self.dispatcher.dispatch(ctx, self.clearing_connector.as_ref(), outbound_request).await {
            Ok(response) => response,
            Err(err) => {
                self.audit(ctx, FlowStage::FlowRejected, "CANCELLED", Value::Null).await;
                return FlowOutcome::rejected_by(ctx, &err);
            }
        };
        self.audit(ctx, FlowStage::Dispatched, "OK", Value::Null).await;

        if !(200..300).contains(&response.status_code) {
            warn!(correlation_id = %ctx.correlation_id, status = response.status_code, "dispatch fell back, emitting fallback response");
            self.audit(ctx, FlowStage::FallbackEmitted, "DISPATCH_FAILED", response.body.clone()).await;
            return FlowOutcome {
                correlation_id: ctx.correlation_id.clone(),
                stage: FlowStage::FallbackEmitted,
                status_reason: Some(StatusReason { group_status: "RJCT", reason_code: "NARR" }),
                response_kind: flow_spec.client_ack_kind.map(str::to_string),
                response: Some(response.body),
                webhook_scheduled: false,
            };
        }

        let response_kind = flow_spec.response_kind.expect("outbound flows declare a response kind");
        // The §6 response envelope wraps the interbank ack under `payload`;
        // fall back to the whole body for connectors that return it bare.
        let clearing_ack_body = response.body.get("payload").cloned().unwrap_or(response.body);
        let clearing_ack = Message::new(response_kind, clearing_ack_body);
        self.audit(ctx, FlowStage::ClearingAck, "OK", Value::Null).await;

        let response_mapping = self.resolver.effective_mapping(&ctx.coordinate, Direction::Response);
        let client_ack_kind = flow_spec.client_ack_kind.expect("outbound flows declare a client ack kind");
        let ack_body = match &response_mapping {
            Some(document) => match self.mapping_engine.apply(document, ctx.tenant_id.as_str(), &clearing_ack.body) {
                Ok(body) => body,
                Err(err) => {
                    self.audit(ctx, FlowStage::FlowRejected, "MAPPING_FAILED", Value::Null).await;
                    return FlowOutcome::rejected_by(ctx, &err);
                }
            },
            None => match self.canonicalizer.transform(&clearing_ack, client_ack_kind, ctx) {
                Some(transformed) => transformed.body,
                None => clearing_ack.body.clone(),
            },
        };
        self.audit(ctx, FlowStage::ResponseMapped, "OK", Value::Null).await;

        self.emit(ctx, request, client_ack_kind, ack_body).await
    }

    async fn handle_inbound_ack(
        &self,
        ctx: &mut FlowContext,
        request: &IngressRequest,
        flow_spec: &FlowSpec,
        message: &Message,
        request_mapping: Option<crate::types::MappingDocument>,
    ) -> FlowOutcome {
        let client_ack_kind = flow_spec.client_ack_kind.expect("inbound ack flows declare a client ack kind");
        let ack_body = match &request_mapping {
            Some(document) => match self.mapping_engine.apply(document, ctx.tenant_id.as_str(), &message.body) {
                Ok(body) => body,
                Err(err) => {
                    self.audit(ctx, FlowStage::FlowRejected, "MAPPING_FAILED", Value::Null).await;
                    return FlowOutcome::rejected_by(ctx, &err);
                }
            },
            None => match self.canonicalizer.transform(message, client_ack_kind, ctx) {
                Some(transformed) => transformed.body,
                None => message.body.clone(),
            },
        };
        self.audit(ctx, FlowStage::Mapped, "OK", Value::Null).await;
        self.audit(ctx, FlowStage::ResponseMapped, "OK", Value::Null).await;

        self.emit(ctx, request, client_ack_kind, ack_body).await
    }

    async fn handle_inbound_notify(&self, ctx: &mut FlowContext, request: &IngressRequest, message: &Message) -> FlowOutcome {
        self.audit(ctx, FlowStage::Mapped, "OK", Value::Null).await;

        match &request.webhook {
            Some(target) => {
                self.schedule_webhook(ctx, target.clone(), message.kind.clone(), message.body.clone());
                self.audit(ctx, FlowStage::Emitted, "NOTIFIED", Value::Null).await;
                FlowOutcome {
                    correlation_id: ctx.correlation_id.clone(),
                    stage: FlowStage::Emitted,
                    status_reason: None,
                    response_kind: Some(message.kind.clone()),
                    response: None,
                    webhook_scheduled: true,
                }
            }
            None => {
                self.audit(ctx, FlowStage::Emitted, "RECORDED", Value::Null).await;
                FlowOutcome {
                    correlation_id: ctx.correlation_id.clone(),
                    stage: FlowStage::Emitted,
                    status_reason: None,
                    response_kind: Some(message.kind.clone()),
                    response: Some(message.body.clone()),
                    webhook_scheduled: false,
                }
            }
        }
    }

    async fn emit(&self, ctx: &FlowContext, request: &IngressRequest, response_kind: &str, body: Value) -> FlowOutcome {
        match request.response_mode {
            ResponseMode::Sync => {
                self.audit(ctx, FlowStage::Emitted, "SYNC", Value::Null).await;
                FlowOutcome {
                    correlation_id: ctx.correlation_id.clone(),
                    stage: FlowStage::Emitted,
                    status_reason: None,
                    response_kind: Some(response_kind.to_string()),
                    response: Some(body),
                    webhook_scheduled: false,
                }
            }
            ResponseMode::Async => match &request.webhook {
                Some(target) => {
                    self.schedule_webhook(ctx, target.clone(), response_kind.to_string(), body);
                    self.audit(ctx, FlowStage::Emitted, "ASYNC", Value::Null).await;
                    FlowOutcome {
                        correlation_id: ctx.correlation_id.clone(),
                        stage: FlowStage::Emitted,
                        status_reason: None,
                        response_kind: Some(response_kind.to_string()),
                        response: None,
                        webhook_scheduled: true,
                    }
                }
                None => {
                    let err = PayBridgeError::Internal("async response mode requires a webhook target".to_string());
                    FlowOutcome::rejected_by(ctx, &err)
                }
            },
        }
    }

    fn schedule_webhook(&self, ctx: &FlowContext, target: WebhookTarget, message_type: String, payload: Value) {
        let webhook_engine = self.webhook_engine.clone();
        let tenant_id = ctx.tenant_id.clone();
        let correlation_id = ctx.correlation_id.clone();
        tokio::spawn(async move {
            let result = webhook_engine
                .deliver(
                    target.url,
                    payload,
                    target.headers,
                    tenant_id,
                    message_type,
                    correlation_id.clone(),
                    target.max_attempts,
                    target.base_delay,
                )
                .await;
            if let Err(err) = result {
                warn!(correlation_id, error = %err, "webhook scheduling failed");
            }
        });
    }
}

/// Probes the common ISO 20022 header paths for a message identifier, per
/// §4.E's implicit requirement that duplicate suppression be keyed on the
/// value carried by the message itself.
fn extract_message_id(message: &Message) -> String {
    for path in ["GrpHdr.MsgId", "PmtId.EndToEndId", "PmtId.TxId"] {
        if let Some(value) = message.get_path(path).and_then(Value::as_str) {
            info!(path, value, "resolved message id from message body");
            return value.to_string();
        }
    }
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::path;
    use crate::outbound::OutboundResponse;
    use crate::storage::LedgerStorageConfig;
    use crate::webhook::WebhookTransport;
    use async_trait::async_trait;
    use serde_json::json;

    struct StubClearingConnector {
        status: u16,
        body: Value,
    }

    #[async_trait]
    impl OutboundConnector for StubClearingConnector {
        fn service_name(&self) -> &str {
            "clearing"
        }

        async fn call(&self, _tenant_id: &str, _request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError> {
            Ok(OutboundResponse { status_code: self.status, body: self.body.clone() })
        }
    }

    struct StubFraudConnector {
        decision: &'static str,
    }

    #[async_trait]
    impl OutboundConnector for StubFraudConnector {
        fn service_name(&self) -> &str {
            "fraud-engine"
        }

        async fn call(&self, _tenant_id: &str, _request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError> {
            Ok(OutboundResponse { status_code: 200, body: json!({"decision": self.decision}) })
        }
    }

    struct NeverCalledWebhookTransport;

    #[async_trait]
    impl WebhookTransport for NeverCalledWebhookTransport {
        async fn post(&self, _url: &str, _payload: &Value, _headers: &BTreeMap<String, String>) -> Result<u16, PayBridgeError> {
            panic!("webhook transport should not be invoked by a sync flow");
        }
    }

    async fn orchestrator(fraud_decision: &'static str, clearing_status: u16, clearing_body: Value) -> FlowOrchestrator {
        let resolver = Arc::new(ConfigResolver::new());
        let mapping_engine = Arc::new(MappingEngine::new());
        let fraud_connector: Arc<dyn OutboundConnector> = Arc::new(StubFraudConnector { decision: fraud_decision });
        let fraud_dispatcher = Arc::new(ResilientDispatcher::new());
        let fraud_gate = Arc::new(FraudGate::new(fraud_connector, fraud_dispatcher));
        let fraud_store = Arc::new(FraudAssessmentStore::new());
        let clearing_connector: Arc<dyn OutboundConnector> = Arc::new(StubClearingConnector { status: clearing_status, body: clearing_body });
        let dispatcher = Arc::new(ResilientDispatcher::new());
        let webhook_engine = Arc::new(WebhookEngine::new(Arc::new(NeverCalledWebhookTransport)));
        let ledger = Arc::new(Mutex::new(PersistentLedger::bootstrap(LedgerStorageConfig::memory()).await.unwrap()));

        FlowOrchestrator::new(resolver, mapping_engine, fraud_gate, fraud_store, clearing_connector, dispatcher, webhook_engine, ledger)
    }

    fn pain001_request(end_to_end_id: &str) -> IngressRequest {
        let body = json!({"pain.001": {"GrpHdr": {"MsgId": "M1"}, "PmtId": {"EndToEndId": end_to_end_id}}}).to_string();
        IngressRequest::new("pain.001", WireFormat::Json, body, TenantId::from("T1"))
    }

    #[tokio::test]
    async fn outbound_flow_emits_pain002_on_approve_and_success() {
        let orchestrator = orchestrator("APPROVE", 200, json!({"status": "SUCCESS", "responseCode": "200"})).await;
        let outcome = orchestrator.handle(pain001_request("E2E-1")).await;
        assert_eq!(outcome.stage, FlowStage::Emitted);
        assert_eq!(outcome.response_kind.as_deref(), Some("pain.002"));
        let response = outcome.response.expect("approved flow emits a pain.002 body");
        assert_eq!(path::get(&response, "OrgnlGrpInfAndSts.GrpSts"), Some(&json!("ACSC")));
        assert_eq!(path::get(&response, "OrgnlGrpInfAndSts.StsRsnInf.Rsn.Cd"), Some(&json!("G000")));
        assert_eq!(path::get(&response, "OrgnlGrpInfAndSts.OrgnlMsgId"), Some(&json!("M1")));
    }

    #[tokio::test]
    async fn outbound_flow_rejects_on_fraud_reject() {
        let orchestrator = orchestrator("REJECT", 200, json!({})).await;
        let outcome = orchestrator.handle(pain001_request("E2E-2")).await;
        assert_eq!(outcome.stage, FlowStage::FlowRejected);
        assert_eq!(outcome.status_reason.unwrap().reason_code, "FRAUD");
    }

    #[tokio::test]
    async fn outbound_flow_pends_on_manual_review() {
        let orchestrator = orchestrator("MANUAL_REVIEW", 200, json!({})).await;
        let outcome = orchestrator.handle(pain001_request("E2E-3")).await;
        assert_eq!(outcome.stage, FlowStage::FlowPending);
        assert_eq!(outcome.status_reason.unwrap().reason_code, "REVIEW");
    }

    #[tokio::test]
    async fn outbound_flow_falls_back_when_clearing_fails() {
        let orchestrator = orchestrator("APPROVE", 500, json!({})).await;
        let outcome = orchestrator.handle(pain001_request("E2E-4")).await;
        assert_eq!(outcome.stage, FlowStage::FallbackEmitted);
    }

    #[tokio::test]
    async fn duplicate_message_in_flight_is_rejected() {
        let orchestrator = orchestrator("APPROVE", 200, json!({"GrpSts": "ACCP"})).await;
        let guard = orchestrator.acquire_slot("T1", "E2E-5").unwrap();
        let outcome = orchestrator.handle(pain001_request("E2E-5")).await;
        assert_eq!(outcome.stage, FlowStage::FlowRejected);
        assert_eq!(outcome.status_reason.unwrap().reason_code, "DUPL");
        drop(guard);
    }

    #[test]
    fn inbound_flow_specs_have_no_request_kind() {
        let spec = lookup_flow_spec("pacs.008").unwrap();
        assert_eq!(spec.kind, FlowKind::InboundAck);
        assert!(spec.request_kind.is_none());
        assert_eq!(spec.client_ack_kind, Some("pacs.002"));
    }
}
