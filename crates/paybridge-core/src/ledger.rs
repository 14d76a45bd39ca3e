//! Persisted state (§6, §3.1 ambient data model): an append-only,
//! hash-chained ledger of per-flow audit entries, plus the fraud assessment
//! store. Fraud assessment records are append-only from the gate and
//! immutable after decision (§5); webhook delivery history lives in
//! [`crate::webhook::WebhookEngine`] instead, since it is single-writer per
//! delivery task rather than append-only.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::PayBridgeError;
use crate::types::{FraudAssessment, TenantId};

/// One append-only ledger record per flow-stage transition (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub index: u64,
    pub correlation_id: String,
    pub tenant_id: String,
    pub message_id: String,
    pub stage: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub detail: Value,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Append-only, hash-chained audit ledger (§3.1, §6 "persisted state").
///
/// Design choice, carried from the teacher's ledger: no in-place mutation
/// APIs are exposed. Every stage transition becomes an additional record.
#[derive(Debug, Default, Clone)]
pub struct AppendOnlyLedger {
    entries: Vec<AuditEntry>,
}

impl AppendOnlyLedger {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Rebuilds a ledger from persisted entries and verifies hash-chain
    /// integrity, for the storage layer's load path.
    pub fn from_entries(entries: Vec<AuditEntry>) -> Result<Self, PayBridgeError> {
        let ledger = Self { entries };

        for (expected_index, entry) in ledger.entries.iter().enumerate() {
            if entry.index != expected_index as u64 {
                return Err(PayBridgeError::Internal(format!(
                    "ledger index gap detected at position {expected_index} (found {})",
                    entry.index
                )));
            }
        }

        if !ledger.verify_chain() {
            return Err(PayBridgeError::Internal("persisted ledger hash-chain verification failed".to_string()));
        }

        Ok(ledger)
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn entries_for_correlation(&self, correlation_id: &str) -> Vec<&AuditEntry> {
        self.entries.iter().filter(|entry| entry.correlation_id == correlation_id).collect()
    }

    pub fn append(
        &mut self,
        correlation_id: impl Into<String>,
        tenant_id: impl Into<String>,
        message_id: impl Into<String>,
        stage: impl Into<String>,
        status: impl Into<String>,
        detail: Value,
    ) -> Result<AuditEntry, PayBridgeError> {
        let entry = self.build_entry(correlation_id, tenant_id, message_id, stage, status, detail);
        self.commit_entry(entry.clone())?;
        Ok(entry)
    }

    /// Builds the next deterministic entry without mutating the in-memory
    /// chain, so the storage layer can persist before committing it.
    pub fn build_entry(
        &self,
        correlation_id: impl Into<String>,
        tenant_id: impl Into<String>,
        message_id: impl Into<String>,
        stage: impl Into<String>,
        status: impl Into<String>,
        detail: Value,
    ) -> AuditEntry {
        let index = self.entries.len() as u64;
        let correlation_id = correlation_id.into();
        let tenant_id = tenant_id.into();
        let message_id = message_id.into();
        let stage = stage.into();
        let status = status.into();
        let timestamp = Utc::now();
        let previous_hash = self.entries.last().map(|entry| entry.entry_hash.clone());
        let entry_hash = compute_entry_hash(
            index,
            &correlation_id,
            &tenant_id,
            &message_id,
            &stage,
            &status,
            timestamp,
            &detail,
            previous_hash.as_deref(),
        );

        AuditEntry {
            entry_id: Uuid::new_v4().to_string(),
            index,
            correlation_id,
            tenant_id,
            message_id,
            stage,
            status,
            timestamp,
            detail,
            previous_hash,
            entry_hash,
        }
    }

    /// Commits a pre-built entry, re-verifying its position and hash. Used
    /// both by [`append`](Self::append) and by the storage layer after
    /// durability succeeds.
    pub fn commit_entry(&mut self, entry: AuditEntry) -> Result<(), PayBridgeError> {
        let expected_index = self.entries.len() as u64;
        if entry.index != expected_index {
            return Err(PayBridgeError::Internal(format!(
                "commit index mismatch: expected {expected_index}, got {}",
                entry.index
            )));
        }

        let expected_previous_hash = self.entries.last().map(|e| e.entry_hash.clone());
        if entry.previous_hash != expected_previous_hash {
            return Err(PayBridgeError::Internal("commit previous hash mismatch".to_string()));
        }

        let expected_hash = compute_entry_hash(
            entry.index,
            &entry.correlation_id,
            &entry.tenant_id,
            &entry.message_id,
            &entry.stage,
            &entry.status,
            entry.timestamp,
            &entry.detail,
            entry.previous_hash.as_deref(),
        );

        if entry.entry_hash != expected_hash {
            return Err(PayBridgeError::Internal("commit hash mismatch for ledger entry".to_string()));
        }

        self.entries.push(entry);
        Ok(())
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for entry in &self.entries {
            let expected_hash = compute_entry_hash(
                entry.index,
                &entry.correlation_id,
                &entry.tenant_id,
                &entry.message_id,
                &entry.stage,
                &entry.status,
                entry.timestamp,
                &entry.detail,
                previous_hash.as_deref(),
            );
            if entry.entry_hash != expected_hash {
                return false;
            }
            if entry.previous_hash != previous_hash {
                return false;
            }
            previous_hash = Some(entry.entry_hash.clone());
        }
        true
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_entry_hash(
    index: u64,
    correlation_id: &str,
    tenant_id: &str,
    message_id: &str,
    stage: &str,
    status: &str,
    timestamp: DateTime<Utc>,
    detail: &Value,
    previous_hash: Option<&str>,
) -> String {
    let material = serde_json::json!({
        "index": index,
        "correlation_id": correlation_id,
        "tenant_id": tenant_id,
        "message_id": message_id,
        "stage": stage,
        "status": status,
        "timestamp": timestamp,
        "detail": detail,
        "previous_hash": previous_hash,
    });

    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Append-only store of fraud assessment records, immutable once a
/// decision is recorded (§5 "fraud assessment records: append-only from the
/// gate; immutable after decision").
#[derive(Debug, Default)]
pub struct FraudAssessmentStore {
    by_message: DashMap<String, Vec<FraudAssessment>>,
}

impl FraudAssessmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, assessment: FraudAssessment) {
        self.by_message.entry(assessment.message_id.clone()).or_default().push(assessment);
    }

    pub fn for_message(&self, message_id: &str) -> Vec<FraudAssessment> {
        self.by_message.get(message_id).map(|entries| entries.clone()).unwrap_or_default()
    }

    pub fn latest_for_message(&self, message_id: &str) -> Option<FraudAssessment> {
        self.by_message.get(message_id).and_then(|entries| entries.last().cloned())
    }

    pub fn for_tenant(&self, tenant_id: &TenantId) -> Vec<FraudAssessment> {
        self.by_message
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|assessment| &assessment.tenant_id == tenant_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FraudDecision, FraudSource, RiskLevel};
    use serde_json::json;

    #[test]
    fn verifies_hash_chain() {
        let mut ledger = AppendOnlyLedger::new();
        ledger.append("corr-1", "T1", "M1", "INGRESS", "OK", json!({})).unwrap();
        ledger.append("corr-1", "T1", "M1", "PARSED", "OK", json!({})).unwrap();
        assert!(ledger.verify_chain());
    }

    #[test]
    fn detects_tampered_entries() {
        let mut ledger = AppendOnlyLedger::new();
        ledger.append("corr-2", "T1", "M1", "INGRESS", "OK", json!({})).unwrap();
        let mut tampered = ledger.clone();
        tampered.entries[0].detail = json!({"tampered": true});
        assert!(!tampered.verify_chain());
    }

    #[test]
    fn rejects_commit_with_wrong_index() {
        let ledger = AppendOnlyLedger::new();
        let mut entry = ledger.build_entry("corr-3", "T1", "M1", "INGRESS", "OK", json!({}));
        entry.index = 5;
        let mut ledger = ledger;
        assert!(ledger.commit_entry(entry).is_err());
    }

    #[test]
    fn entries_for_correlation_filters_other_flows() {
        let mut ledger = AppendOnlyLedger::new();
        ledger.append("corr-a", "T1", "M1", "INGRESS", "OK", json!({})).unwrap();
        ledger.append("corr-b", "T1", "M2", "INGRESS", "OK", json!({})).unwrap();
        assert_eq!(ledger.entries_for_correlation("corr-a").len(), 1);
    }

    #[test]
    fn fraud_assessment_store_is_append_only_per_message() {
        let store = FraudAssessmentStore::new();
        let assessment = FraudAssessment {
            assessment_id: "A1".to_string(),
            message_id: "M1".to_string(),
            tenant_id: TenantId::from("T1"),
            source: FraudSource::BankClient,
            assessment_type: crate::types::AssessmentType::RealTime,
            status: crate::types::AssessmentStatus::Ok,
            decision: FraudDecision::Approve,
            risk_level: RiskLevel::Low,
            risk_score: 0.1,
            reason: None,
            error_message: None,
            created_at: Utc::now(),
        };
        store.record(assessment.clone());
        assert_eq!(store.for_message("M1").len(), 1);
        assert_eq!(store.latest_for_message("M1").unwrap().assessment_id, "A1");
    }
}
