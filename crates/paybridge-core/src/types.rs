//! Core data model: tenants, coordinates, auth/mapping configuration, fraud
//! assessments, the structured message tree, and per-flow context.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An opaque, stable, case-sensitive identifier used throughout the routing
/// coordinate. Bounded length is enforced by [`new`](StableId::new); callers
/// constructing from trusted configuration may use [`StableId::from`] instead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StableId(String);

const MAX_STABLE_ID_LEN: usize = 128;

impl StableId {
    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_STABLE_ID_LEN {
            return Err(format!(
                "identifier must be 1..={MAX_STABLE_ID_LEN} bytes, got {}",
                value.len()
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StableId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StableId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

pub type TenantId = StableId;
pub type PaymentType = StableId;
pub type LocalInstrumentCode = StableId;
pub type ClearingSystemCode = StableId;

/// Direction a policy or mapping document applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Request,
    Response,
    Bidirectional,
}

impl Direction {
    /// Whether a document published for `self` is eligible for a lookup
    /// performed for `wanted`.
    pub fn matches(&self, wanted: Direction) -> bool {
        *self == Direction::Bidirectional || *self == wanted
    }
}

/// The tuple that pins a policy in the configuration lattice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCoordinate {
    pub tenant_id: TenantId,
    pub payment_type: Option<PaymentType>,
    pub local_instrument: Option<LocalInstrumentCode>,
    pub clearing_system: Option<ClearingSystemCode>,
    pub direction: Direction,
}

impl PolicyCoordinate {
    pub fn new(tenant_id: TenantId, direction: Direction) -> Self {
        Self {
            tenant_id,
            payment_type: None,
            local_instrument: None,
            clearing_system: None,
            direction,
        }
    }

    pub fn with_payment_type(mut self, payment_type: impl Into<PaymentType>) -> Self {
        self.payment_type = Some(payment_type.into());
        self
    }

    pub fn with_local_instrument(mut self, local_instrument: impl Into<LocalInstrumentCode>) -> Self {
        self.local_instrument = Some(local_instrument.into());
        self
    }

    pub fn with_clearing_system(mut self, clearing_system: impl Into<ClearingSystemCode>) -> Self {
        self.clearing_system = Some(clearing_system.into());
        self
    }

    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}/{}/{:?}",
            self.tenant_id,
            self.payment_type.as_ref().map(StableId::as_str).unwrap_or("*"),
            self.local_instrument.as_ref().map(StableId::as_str).unwrap_or("*"),
            self.clearing_system.as_ref().map(StableId::as_str).unwrap_or("*"),
            self.direction,
        )
    }
}

/// The precedence level a configuration record was published at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigLevel {
    /// Lowest precedence: clearing-system or global default.
    ClearingSystem = 0,
    Tenant = 1,
    PaymentType = 2,
    /// Highest precedence: an override scoped to one downstream call.
    DownstreamCall = 3,
}

impl ConfigLevel {
    /// All levels, highest precedence first.
    pub fn precedence_order() -> [ConfigLevel; 4] {
        [
            ConfigLevel::DownstreamCall,
            ConfigLevel::PaymentType,
            ConfigLevel::Tenant,
            ConfigLevel::ClearingSystem,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JwsAlgorithm {
    Hs256,
    Hs384,
    Hs512,
    Rs256,
    Rs384,
    Rs512,
}

/// Optional per-coordinate client-identification headers layered on top of
/// the primary [`AuthConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHeaders {
    pub enabled: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub id_header_name: String,
    pub secret_header_name: String,
}

/// An active authentication configuration for the outbound call to a
/// clearing system or fraud engine. Exactly one is active per level per
/// coordinate at any time (§3 invariant); the resolver enforces that by
/// construction rather than runtime checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum AuthConfig {
    #[serde(rename = "JWT")]
    Jwt {
        secret: String,
        issuer: String,
        audience: String,
        expiration_seconds: u64,
    },
    #[serde(rename = "JWS")]
    Jws {
        secret_or_public_key: String,
        algorithm: JwsAlgorithm,
        issuer: String,
        audience: String,
        expiration_seconds: u64,
    },
    #[serde(rename = "OAUTH2")]
    OAuth2 {
        token_endpoint: String,
        client_id: String,
        client_secret: String,
        scope: String,
    },
    #[serde(rename = "API_KEY")]
    ApiKey { key: String, header_name: String },
    #[serde(rename = "BASIC")]
    Basic { username: String, password: String },
}

/// A published auth-config record, scoped to a level and a coordinate match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfigRecord {
    pub name: String,
    pub level: ConfigLevel,
    pub coordinate: CoordinateMatch,
    pub priority: u8,
    pub active: bool,
    pub config: AuthConfig,
    pub client_headers: Option<ClientHeaders>,
}

/// A coordinate pattern used by configuration records: each field is either
/// a concrete value to match or `None`, meaning "wildcard, matches anything".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinateMatch {
    pub tenant_id: Option<TenantId>,
    pub payment_type: Option<PaymentType>,
    pub local_instrument: Option<LocalInstrumentCode>,
    pub clearing_system: Option<ClearingSystemCode>,
    pub direction: Option<Direction>,
}

impl CoordinateMatch {
    pub fn matches(&self, coordinate: &PolicyCoordinate) -> bool {
        field_matches(self.tenant_id.as_ref(), Some(&coordinate.tenant_id))
            && field_matches(self.payment_type.as_ref(), coordinate.payment_type.as_ref())
            && field_matches(
                self.local_instrument.as_ref(),
                coordinate.local_instrument.as_ref(),
            )
            && field_matches(
                self.clearing_system.as_ref(),
                coordinate.clearing_system.as_ref(),
            )
            && self
                .direction
                .map(|d| d.matches(coordinate.direction))
                .unwrap_or(true)
    }
}

fn field_matches(candidate: Option<&StableId>, actual: Option<&StableId>) -> bool {
    match candidate {
        None => true,
        Some(want) => actual.map(|have| have == want).unwrap_or(false),
    }
}

/// A mapping clause, tagged by variant. See SPEC_FULL.md §4.B for the fixed
/// application order across variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MappingClause {
    FieldMapping { source_path: String, target_path: String },
    ValueAssignment { target_path: String, template: String },
    DerivedValue { target_path: String, expression: String },
    AutoGeneration { target_path: String, generator: Generator },
    Conditional {
        target_path: String,
        predicate: String,
        value_template: String,
    },
    Transformation { target_path: String, function: TransformFn },
    DefaultValue { target_path: String, value: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Generator {
    Uuid,
    Timestamp,
    Sequential {
        prefix: String,
        suffix: String,
        length: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformFn {
    Uppercase,
    Lowercase,
    Trim,
    Pad { width: usize, char: char },
    Substring { start: usize, end: Option<usize> },
    RegexReplace { pattern: String, replacement: String },
}

/// An ordered collection of mapping clauses applied to a source payload to
/// produce a target payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDocument {
    pub name: String,
    pub coordinate: CoordinateMatch,
    pub direction: Direction,
    pub priority: u8,
    pub active: bool,
    pub version: u32,
    pub clauses: Vec<MappingClause>,
}

impl MappingDocument {
    /// §4.B validation: priority range, path/expression parseability.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=100).contains(&self.priority) {
            return Err(format!(
                "document '{}' has out-of-range priority {}",
                self.name, self.priority
            ));
        }
        for clause in &self.clauses {
            validate_clause(clause)?;
        }
        Ok(())
    }
}

fn validate_clause(clause: &MappingClause) -> Result<(), String> {
    let path = match clause {
        MappingClause::FieldMapping { target_path, .. }
        | MappingClause::ValueAssignment { target_path, .. }
        | MappingClause::DerivedValue { target_path, .. }
        | MappingClause::AutoGeneration { target_path, .. }
        | MappingClause::Conditional { target_path, .. }
        | MappingClause::Transformation { target_path, .. }
        | MappingClause::DefaultValue { target_path, .. } => target_path,
    };
    if path.is_empty() {
        return Err("clause target path must not be empty".to_string());
    }
    Ok(())
}

/// Which side originated the message reaching the fraud gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudSource {
    BankClient,
    ClearingSystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentType {
    RealTime,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssessmentStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudDecision {
    Approve,
    Reject,
    ManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// A fraud/risk decision record. Immutable once `decision` is set (§3
/// lifecycle); constructed exclusively by [`crate::fraud::FraudGate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAssessment {
    pub assessment_id: String,
    pub message_id: String,
    pub tenant_id: TenantId,
    pub source: FraudSource,
    pub assessment_type: AssessmentType,
    pub status: AssessmentStatus,
    pub decision: FraudDecision,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub reason: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FraudAssessment {
    /// The fail-safe assessment used when the fraud engine errors or times
    /// out (§4.C decision handling, §8 property 3).
    pub fn fail_safe(
        message_id: impl Into<String>,
        tenant_id: TenantId,
        source: FraudSource,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            assessment_id: Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            tenant_id,
            source,
            assessment_type: AssessmentType::RealTime,
            status: AssessmentStatus::Error,
            decision: FraudDecision::ManualReview,
            risk_level: RiskLevel::Medium,
            risk_score: 0.5,
            reason: Some("fraud engine error, failing safe to manual review".to_string()),
            error_message: Some(error_message.into()),
            created_at: Utc::now(),
        }
    }
}

/// Metadata the orchestrator attaches to every in-flight [`Message`]; never
/// forwarded over the wire (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub original_message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub direction: Option<Direction>,
    pub generated_at: Option<DateTime<Utc>>,
}

/// A structured tree of string keys to value/tree/ordered-list, modelling
/// one ISO 20022 message regardless of its wire encoding (JSON or XML).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: String,
    pub body: Value,
    #[serde(rename = "_metadata")]
    pub metadata: Value,
}

impl Message {
    pub fn new(kind: impl Into<String>, body: Value) -> Self {
        Self {
            kind: kind.into(),
            body,
            metadata: Value::Object(Default::default()),
        }
    }

    /// Dotted-path lookup into `body` (the `_metadata` subtree is excluded
    /// from lookups so mapping clauses cannot accidentally read it back).
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        crate::mapping::path::get(&self.body, path)
    }

    pub fn set_path(&mut self, path: &str, value: Value) {
        crate::mapping::path::set(&mut self.body, path, value);
    }
}

/// Per-request state, created on ingress and destroyed on final
/// response/emission (§3 ownership rules).
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub correlation_id: String,
    pub message_id: String,
    pub tenant_id: TenantId,
    pub coordinate: PolicyCoordinate,
    pub started_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_stage_status: Option<String>,
    cancelled: Arc<AtomicBool>,
}

impl FlowContext {
    pub fn new(message_id: impl Into<String>, coordinate: PolicyCoordinate) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            message_id: message_id.into(),
            tenant_id: coordinate.tenant_id.clone(),
            coordinate,
            started_at: Utc::now(),
            attempts: 0,
            last_stage_status: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn deadline_elapsed(&self, flow_deadline_ms: u64) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        elapsed.num_milliseconds() as u64 >= flow_deadline_ms
    }

    /// The flow's cancellation signal (§3, §5): propagates to every child
    /// operation the orchestrator spawns (dispatcher calls, webhook delivery).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookStatus {
    Pending,
    Delivering,
    Delivered,
    Retrying,
    Failed,
    GivenUp,
}

/// A single correlated asynchronous delivery, owned exclusively by the
/// [`crate::webhook::WebhookEngine`] keyed by `correlation_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub correlation_id: String,
    pub target_url: String,
    pub payload: Value,
    pub headers: BTreeMap<String, String>,
    pub tenant_id: TenantId,
    pub message_type: String,
    pub status: WebhookStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub result: Option<WebhookResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResult {
    pub success: bool,
    pub attempt: u32,
    pub last_status_code: Option<u16>,
    pub last_error: Option<String>,
    pub completed_at: DateTime<Utc>,
}
