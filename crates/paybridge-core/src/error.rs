use thiserror::Error;

/// The error taxonomy shared by every pipeline component.
///
/// Stages never surface these raw to a client; the flow orchestrator is the single
/// place that folds a [`PayBridgeError`] into an ISO 20022 status/reason pair.
#[derive(Debug, Error, Clone)]
pub enum PayBridgeError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration missing for {coordinate}: {kind}")]
    ConfigurationMissing { coordinate: String, kind: String },

    #[error("fraud gate rejected message: {0}")]
    FraudRejected(String),

    #[error("fraud gate requires manual review: {0}")]
    FraudReview(String),

    #[error("mapping document '{document}' failed: {reason}")]
    MappingFailed { document: String, reason: String },

    #[error("transient dispatch error calling {service}: {message}")]
    DispatchTransient { service: String, message: String },

    #[error("permanent dispatch error calling {service}: {message}")]
    DispatchPermanent { service: String, message: String },

    #[error("circuit open for service {service}")]
    CircuitOpen { service: String },

    #[error("resource saturated for service {service}: {reason}")]
    Saturated { service: String, reason: String },

    #[error("operation timed out after {elapsed_ms}ms")]
    TimedOut { elapsed_ms: u64 },

    #[error("flow cancelled")]
    Cancelled,

    #[error("duplicate message in flight: {tenant_id}/{message_id}")]
    Duplicate { tenant_id: String, message_id: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl PayBridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::ConfigurationMissing { .. } => ErrorKind::ConfigurationMissing,
            Self::FraudRejected(_) => ErrorKind::FraudRejected,
            Self::FraudReview(_) => ErrorKind::FraudReview,
            Self::MappingFailed { .. } => ErrorKind::MappingFailed,
            Self::DispatchTransient { .. } => ErrorKind::DispatchTransient,
            Self::DispatchPermanent { .. } => ErrorKind::DispatchPermanent,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Saturated { .. } => ErrorKind::Saturated,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Duplicate { .. } => ErrorKind::Duplicate,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the resilient dispatcher should retry an error of this shape.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DispatchTransient { .. })
    }

    pub fn stage_violation(expected: &str, actual: &str) -> Self {
        Self::Internal(format!(
            "stage order violation: expected '{expected}', got '{actual}'"
        ))
    }
}

/// The bare taxonomy kind, used for audit records and metrics where the full
/// error value (with its context) would be too heavy to carry around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    ConfigurationMissing,
    FraudRejected,
    FraudReview,
    MappingFailed,
    DispatchTransient,
    DispatchPermanent,
    CircuitOpen,
    Saturated,
    TimedOut,
    Cancelled,
    Duplicate,
    Internal,
}

/// ISO 20022 group status plus reason code, the only shape an error is allowed
/// to take once it crosses the orchestrator boundary to a client.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusReason {
    pub group_status: &'static str,
    pub reason_code: &'static str,
}

impl PayBridgeError {
    /// Maps an internal error to the client-visible ISO 20022 status/reason pair
    /// per the propagation policy.
    pub fn to_status_reason(&self) -> StatusReason {
        match self.kind() {
            ErrorKind::Validation => StatusReason {
                group_status: "RJCT",
                reason_code: "VALIDATION",
            },
            ErrorKind::Duplicate => StatusReason {
                group_status: "RJCT",
                reason_code: "DUPL",
            },
            ErrorKind::FraudRejected => StatusReason {
                group_status: "RJCT",
                reason_code: "FRAUD",
            },
            ErrorKind::FraudReview => StatusReason {
                group_status: "PDNG",
                reason_code: "REVIEW",
            },
            ErrorKind::ConfigurationMissing
            | ErrorKind::MappingFailed
            | ErrorKind::DispatchPermanent
            | ErrorKind::DispatchTransient
            | ErrorKind::CircuitOpen
            | ErrorKind::Saturated
            | ErrorKind::TimedOut
            | ErrorKind::Cancelled
            | ErrorKind::Internal => StatusReason {
                group_status: "RJCT",
                reason_code: "NARR",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_transient_is_retryable() {
        let err = PayBridgeError::DispatchTransient {
            service: "clearing".into(),
            message: "connect reset".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn dispatch_permanent_is_not_retryable() {
        let err = PayBridgeError::DispatchPermanent {
            service: "clearing".into(),
            message: "400".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn fraud_reject_maps_to_rjct_fraud() {
        let err = PayBridgeError::FraudRejected("HIGH_RISK".into());
        let sr = err.to_status_reason();
        assert_eq!(sr.group_status, "RJCT");
        assert_eq!(sr.reason_code, "FRAUD");
    }

    #[test]
    fn manual_review_maps_to_pdng_review() {
        let err = PayBridgeError::FraudReview("manual".into());
        let sr = err.to_status_reason();
        assert_eq!(sr.group_status, "PDNG");
        assert_eq!(sr.reason_code, "REVIEW");
    }

    #[test]
    fn stage_violation_is_internal() {
        let err = PayBridgeError::stage_violation("parsed", "ingress");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("stage order violation"));
    }
}
