//! Core multi-tenant ISO 20022 payment scheme middleware: hierarchical
//! configuration resolution, declarative payload mapping, a fail-safe fraud
//! gate, ISO 20022 canonicalization, flow orchestration, a resilient
//! outbound dispatcher, and webhook delivery.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod flow;
pub mod fraud;
pub mod iso20022;
pub mod ledger;
pub mod mapping;
pub mod outbound;
pub mod resilience;
pub mod storage;
pub mod types;
pub mod webhook;

pub use config::ConfigResolver;
pub use error::{ErrorKind, PayBridgeError, StatusReason};
pub use flow::{FlowKind, FlowOrchestrator, FlowOutcome, FlowSpec, FlowStage, IngressRequest, ResponseMode, WebhookTarget};
pub use fraud::FraudGate;
pub use iso20022::{Canonicalizer, ValidationResult, WireFormat};
pub use ledger::{AppendOnlyLedger, AuditEntry, FraudAssessmentStore};
pub use mapping::MappingEngine;
pub use outbound::{OutboundConnector, OutboundRequest, OutboundResponse};
pub use resilience::{
    Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState, FallbackConfig, HealthCheckConfig,
    RateLimiter, RateLimiterConfig, ResiliencePolicy, ResilientDispatcher, RetryConfig, ServiceHealthStatus,
};
pub use storage::{LedgerStorageConfig, PersistentLedger};
pub use types::{
    AssessmentStatus, AssessmentType, AuthConfig, AuthConfigRecord, ClientHeaders, ConfigLevel, CoordinateMatch,
    Direction, FlowContext, FraudAssessment, FraudDecision, FraudSource, Generator, JwsAlgorithm,
    LocalInstrumentCode, Message, MappingClause, MappingDocument, MessageMetadata, PaymentType, PolicyCoordinate,
    RiskLevel, StableId, TenantId, TransformFn, WebhookDelivery, WebhookResult, WebhookStatus,
};
pub use webhook::{WebhookEngine, WebhookTransport};
