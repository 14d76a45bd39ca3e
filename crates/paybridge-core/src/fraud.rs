//! The fraud/risk gate (component C): synchronously obtains a
//! [`FraudAssessment`] from the configured bank fraud/risk engine and gates
//! the flow on its decision (§4.C).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::error::PayBridgeError;
use crate::mapping::{expr, path};
use crate::outbound::{OutboundConnector, OutboundRequest};
use crate::resilience::{time_limiter, ResilientDispatcher};
use crate::types::{
    AssessmentStatus, AssessmentType, FlowContext, FraudAssessment, FraudDecision, FraudSource, Message,
    PolicyCoordinate, RiskLevel, TenantId,
};

/// Candidate body paths probed, in order, when no request template is
/// configured for a tenant (§4.C "default shape").
const DEFAULT_SHAPE_PATHS: &[(&str, &str)] = &[
    ("transactionReference", "PmtId.EndToEndId"),
    ("transactionReference", "GrpHdr.MsgId"),
    ("amount", "Amt.InstdAmt"),
    ("amount", "IntrBkSttlmAmt"),
    ("debtor", "Dbtr.Nm"),
    ("creditor", "Cdtr.Nm"),
    ("debtorAgent", "DbtrAgt.FinInstnId.BICFI"),
    ("creditorAgent", "CdtrAgt.FinInstnId.BICFI"),
];

/// Gates a flow through the bank's fraud/risk engine (§4.C). Holds exactly
/// one collaborator connector plus per-tenant request templates and
/// deadlines; concurrent-safe for use across the whole service.
pub struct FraudGate {
    connector: Arc<dyn OutboundConnector>,
    dispatcher: Arc<ResilientDispatcher>,
    templates: DashMap<String, Value>,
    deadlines: DashMap<String, Duration>,
    clearing_tokens: Vec<String>,
    default_deadline: Duration,
}

impl FraudGate {
    pub fn new(connector: Arc<dyn OutboundConnector>, dispatcher: Arc<ResilientDispatcher>) -> Self {
        Self {
            connector,
            dispatcher,
            templates: DashMap::new(),
            deadlines: DashMap::new(),
            clearing_tokens: vec!["RTGS".to_string(), "CLEARING".to_string()],
            default_deadline: Duration::from_secs(30),
        }
    }

    pub fn with_clearing_tokens(mut self, tokens: Vec<String>) -> Self {
        self.clearing_tokens = tokens;
        self
    }

    /// Publishes the request template for a tenant; placeholders follow the
    /// mapping engine's `${source.path}` grammar evaluated against the
    /// context built in [`build_context`](Self::build_context).
    pub fn set_request_template(&self, tenant_id: &str, template: Value) {
        self.templates.insert(tenant_id.to_string(), template);
    }

    pub fn set_deadline(&self, tenant_id: &str, deadline: Duration) {
        self.deadlines.insert(tenant_id.to_string(), deadline);
    }

    /// Source determination (§4.C): clearing-originated flows are recognised
    /// by configured payment-type/local-instrument tokens.
    fn determine_source(&self, coordinate: &PolicyCoordinate) -> FraudSource {
        let is_clearing_token = |value: &str| self.clearing_tokens.iter().any(|t| value.eq_ignore_ascii_case(t));
        let payment_type_matches = coordinate.payment_type.as_ref().map(|v| is_clearing_token(v.as_str())).unwrap_or(false);
        let local_instrument_matches = coordinate.local_instrument.as_ref().map(|v| is_clearing_token(v.as_str())).unwrap_or(false);
        if payment_type_matches || local_instrument_matches {
            FraudSource::ClearingSystem
        } else {
            FraudSource::BankClient
        }
    }

    fn build_context(
        &self,
        ctx: &FlowContext,
        message: &Message,
        source: FraudSource,
        assessment_type: AssessmentType,
    ) -> Value {
        json!({
            "messageId": ctx.message_id,
            "tenantId": ctx.tenant_id.as_str(),
            "transactionReference": path::get(&message.body, "PmtId.EndToEndId").cloned().unwrap_or(Value::Null),
            "paymentType": ctx.coordinate.payment_type.as_ref().map(|v| v.as_str().to_string()),
            "assessmentSource": source,
            "assessmentType": assessment_type,
            "body": message.body,
        })
    }

    fn default_request(&self, context: &Value) -> Value {
        let mut fields = Map::new();
        fields.insert("messageId".to_string(), context["messageId"].clone());
        fields.insert("tenantId".to_string(), context["tenantId"].clone());
        fields.insert("assessmentSource".to_string(), context["assessmentSource"].clone());
        fields.insert("assessmentType".to_string(), context["assessmentType"].clone());
        let body = &context["body"];
        for (field, source_path) in DEFAULT_SHAPE_PATHS {
            if let Some(value) = path::get(body, source_path) {
                fields.insert((*field).to_string(), value.clone());
            }
        }
        Value::Object(fields)
    }

    /// Runs `template` against `context`, substituting `${source.path}`
    /// placeholders in every string leaf while preserving structure.
    fn substitute(template: &Value, context: &Value) -> Value {
        match template {
            Value::String(s) => expr::render_template(s, context),
            Value::Array(items) => Value::Array(items.iter().map(|v| Self::substitute(v, context)).collect()),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), Self::substitute(value, context));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    /// Obtains a [`FraudAssessment`] for `message` under `ctx`, bounded by
    /// the tenant's deadline (default 30s). Any engine error, timeout, or
    /// malformed response fails safe to `MANUAL_REVIEW` (§4.C, §8 property 3).
    pub async fn assess(&self, ctx: &FlowContext, message: &Message) -> FraudAssessment {
        let source = self.determine_source(&ctx.coordinate);
        let assessment_type = AssessmentType::RealTime;
        let context = self.build_context(ctx, message, source, assessment_type);

        let request_body = match self.templates.get(ctx.tenant_id.as_str()) {
            Some(template) => Self::substitute(&template, &context),
            None => self.default_request(&context),
        };

        let deadline = self
            .deadlines
            .get(ctx.tenant_id.as_str())
            .map(|d| *d)
            .unwrap_or(self.default_deadline);

        let request = OutboundRequest::new(request_body);
        let dispatch = self.dispatcher.dispatch(ctx, self.connector.as_ref(), request);

        match time_limiter::execute_with_deadline(deadline, dispatch).await {
            Ok(Ok(response)) => {
                if !(200..300).contains(&response.status_code) {
                    warn!(tenant_id = %ctx.tenant_id, status = response.status_code, "fraud engine returned non-2xx");
                    return FraudAssessment::fail_safe(
                        ctx.message_id.clone(),
                        ctx.tenant_id.clone(),
                        source,
                        format!("fraud engine returned status {}", response.status_code),
                    );
                }
                interpret_decision(&ctx.message_id, ctx.tenant_id.clone(), source, &response.body)
            }
            Ok(Err(err)) => {
                warn!(tenant_id = %ctx.tenant_id, error = %err, "fraud engine call failed, failing safe");
                FraudAssessment::fail_safe(ctx.message_id.clone(), ctx.tenant_id.clone(), source, err.to_string())
            }
            Err(err) => {
                warn!(tenant_id = %ctx.tenant_id, error = %err, "fraud engine deadline exceeded, failing safe");
                FraudAssessment::fail_safe(ctx.message_id.clone(), ctx.tenant_id.clone(), source, err.to_string())
            }
        }
    }
}

fn interpret_decision(message_id: &str, tenant_id: TenantId, source: FraudSource, body: &Value) -> FraudAssessment {
    let decision = body.get("decision").and_then(Value::as_str);
    let risk_level = body
        .get("riskLevel")
        .and_then(Value::as_str)
        .map(parse_risk_level)
        .unwrap_or(RiskLevel::Medium);
    let risk_score = body.get("riskScore").and_then(Value::as_f64).unwrap_or(0.5);
    let reason = body.get("reason").and_then(Value::as_str).map(str::to_string);
    let assessment_id = body
        .get("assessmentId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let decision = match decision {
        Some("APPROVE") => FraudDecision::Approve,
        Some("REJECT") => FraudDecision::Reject,
        Some("MANUAL_REVIEW") => FraudDecision::ManualReview,
        other => {
            warn!(tenant_id = %tenant_id, decision = ?other, "fraud engine returned unrecognized decision, failing safe");
            return FraudAssessment::fail_safe(
                message_id,
                tenant_id,
                source,
                format!("unrecognized fraud decision: {other:?}"),
            );
        }
    };

    FraudAssessment {
        assessment_id,
        message_id: message_id.to_string(),
        tenant_id,
        source,
        assessment_type: AssessmentType::RealTime,
        status: AssessmentStatus::Ok,
        decision,
        risk_level,
        risk_score,
        reason,
        error_message: None,
        created_at: chrono::Utc::now(),
    }
}

fn parse_risk_level(value: &str) -> RiskLevel {
    match value.to_ascii_uppercase().as_str() {
        "LOW" => RiskLevel::Low,
        "MEDIUM" => RiskLevel::Medium,
        "HIGH" => RiskLevel::High,
        "CRITICAL" => RiskLevel::Critical,
        _ => RiskLevel::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::OutboundResponse;
    use crate::resilience::ResilientDispatcher;
    use crate::types::Direction;
    use async_trait::async_trait;

    struct StubConnector {
        response: Value,
        status: u16,
    }

    #[async_trait]
    impl OutboundConnector for StubConnector {
        fn service_name(&self) -> &str {
            "fraud-engine"
        }

        async fn call(&self, _tenant_id: &str, _request: OutboundRequest) -> Result<OutboundResponse, PayBridgeError> {
            Ok(OutboundResponse { status_code: self.status, body: self.response.clone() })
        }
    }

    fn ctx(payment_type: Option<&str>) -> FlowContext {
        let mut coordinate = PolicyCoordinate::new(TenantId::from("T1"), Direction::Request);
        if let Some(pt) = payment_type {
            coordinate = coordinate.with_payment_type(pt);
        }
        FlowContext::new("M1", coordinate)
    }

    #[tokio::test]
    async fn approve_decision_proceeds() {
        let connector = Arc::new(StubConnector { response: json!({"decision": "APPROVE", "riskLevel": "LOW", "riskScore": 0.1}), status: 200 });
        let gate = FraudGate::new(connector, Arc::new(ResilientDispatcher::new()));
        let message = Message::new("pain.001", json!({"PmtId": {"EndToEndId": "E2E-1"}}));
        let assessment = gate.assess(&ctx(None), &message).await;
        assert_eq!(assessment.decision, FraudDecision::Approve);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn engine_error_status_fails_safe_to_manual_review() {
        let connector = Arc::new(StubConnector { response: json!({}), status: 500 });
        let gate = FraudGate::new(connector, Arc::new(ResilientDispatcher::new()));
        let message = Message::new("pain.001", json!({}));
        let assessment = gate.assess(&ctx(None), &message).await;
        assert_eq!(assessment.decision, FraudDecision::ManualReview);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
        assert_eq!(assessment.status, AssessmentStatus::Error);
    }

    #[tokio::test]
    async fn unrecognized_decision_fails_safe() {
        let connector = Arc::new(StubConnector { response: json!({"decision": "MAYBE"}), status: 200 });
        let gate = FraudGate::new(connector, Arc::new(ResilientDispatcher::new()));
        let message = Message::new("pain.001", json!({}));
        let assessment = gate.assess(&ctx(None), &message).await;
        assert_eq!(assessment.decision, FraudDecision::ManualReview);
    }

    #[tokio::test]
    async fn clearing_token_payment_type_selects_clearing_system_source() {
        let connector = Arc::new(StubConnector { response: json!({"decision": "APPROVE"}), status: 200 });
        let gate = FraudGate::new(connector, Arc::new(ResilientDispatcher::new()));
        let message = Message::new("pacs.008", json!({}));
        let assessment = gate.assess(&ctx(Some("RTGS")), &message).await;
        assert_eq!(assessment.source, FraudSource::ClearingSystem);
    }

    #[tokio::test]
    async fn request_template_substitutes_placeholders() {
        let connector = Arc::new(StubConnector { response: json!({"decision": "APPROVE"}), status: 200 });
        let gate = FraudGate::new(connector, Arc::new(ResilientDispatcher::new()));
        gate.set_request_template("T1", json!({"msg": "${source.messageId}", "tenant": "${source.tenantId}"}));
        let message = Message::new("pain.001", json!({}));
        let assessment = gate.assess(&ctx(None), &message).await;
        assert_eq!(assessment.decision, FraudDecision::Approve);
    }
}
