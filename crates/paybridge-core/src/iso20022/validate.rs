//! Per-kind validation (§4.D): enumerates required keys in the group header
//! and payment information blocks. Strict about presence and types, not
//! full XSD conformance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mapping::path;

/// Required dotted paths, and the transaction-array path (if any) whose
/// entries are each checked against `transaction_required` (§4.D "payment
/// information blocks").
struct KindRules {
    header_required: &'static [&'static str],
    transaction_array: Option<&'static str>,
    transaction_required: &'static [&'static str],
}

fn rules_for(kind: &str) -> Option<KindRules> {
    match kind {
        "pain.001" => Some(KindRules {
            header_required: &["GrpHdr.MsgId", "GrpHdr.CreDtTm", "GrpHdr.NbOfTxs"],
            transaction_array: Some("PmtInf"),
            transaction_required: &["PmtInf.PmtId.EndToEndId", "PmtInf.Amt.InstdAmt", "PmtInf.Cdtr.Nm"],
        }),
        "pain.002" => Some(KindRules {
            header_required: &["GrpHdr.MsgId", "GrpHdr.CreDtTm"],
            transaction_array: None,
            transaction_required: &[],
        }),
        "pacs.008" => Some(KindRules {
            header_required: &["GrpHdr.MsgId", "GrpHdr.CreDtTm", "GrpHdr.NbOfTxs"],
            transaction_array: Some("CdtTrfTxInf"),
            transaction_required: &["CdtTrfTxInf.PmtId.EndToEndId", "CdtTrfTxInf.IntrBkSttlmAmt"],
        }),
        "pacs.002" => Some(KindRules {
            header_required: &["GrpHdr.MsgId", "GrpHdr.CreDtTm"],
            transaction_array: None,
            transaction_required: &[],
        }),
        "pacs.004" => Some(KindRules {
            header_required: &["GrpHdr.MsgId", "GrpHdr.CreDtTm"],
            transaction_array: Some("TxInf"),
            transaction_required: &["TxInf.OrgnlEndToEndId"],
        }),
        "pacs.007" => Some(KindRules {
            header_required: &["GrpHdr.MsgId", "GrpHdr.CreDtTm"],
            transaction_array: Some("TxInf"),
            transaction_required: &["TxInf.OrgnlEndToEndId"],
        }),
        "pacs.028" => Some(KindRules {
            header_required: &["GrpHdr.MsgId", "GrpHdr.CreDtTm"],
            transaction_array: Some("TxInf"),
            transaction_required: &["TxInf.OrgnlEndToEndId"],
        }),
        "camt.029" => Some(KindRules {
            header_required: &["Assgnmt.Id", "Assgnmt.CreDtTm"],
            transaction_array: None,
            transaction_required: &[],
        }),
        "camt.053" => Some(KindRules {
            header_required: &["GrpHdr.MsgId", "GrpHdr.CreDtTm"],
            transaction_array: None,
            transaction_required: &[],
        }),
        "camt.054" => Some(KindRules {
            header_required: &["GrpHdr.MsgId", "GrpHdr.CreDtTm"],
            transaction_array: None,
            transaction_required: &[],
        }),
        "camt.055" => Some(KindRules {
            header_required: &["Assgnmt.Id", "Assgnmt.CreDtTm"],
            transaction_array: None,
            transaction_required: &[],
        }),
        "camt.056" => Some(KindRules {
            header_required: &["Assgnmt.Id", "Assgnmt.CreDtTm"],
            transaction_array: None,
            transaction_required: &[],
        }),
        _ => None,
    }
}

/// `{valid, errors[], warnings[], timestamp}` (§4.D). Never aborts on
/// warnings; a missing optional enrichment is recorded there instead of in
/// `errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Validates `body` against the required-key rules for `kind`. An
/// unrecognised `kind` is itself a validation error rather than a panic —
/// the canonicalizer only supports the twelve kinds enumerated in §4.D.
pub fn validate(kind: &str, body: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match rules_for(kind) {
        None => errors.push(format!("unsupported message kind: {kind}")),
        Some(rules) => {
            for required in rules.header_required {
                if !path::exists(body, required) {
                    errors.push(format!("missing required field: {required}"));
                }
            }

            if let Some(array_path) = rules.transaction_array {
                match path::get(body, array_path) {
                    Some(Value::Array(items)) if !items.is_empty() => {
                        for (index, item) in items.iter().enumerate() {
                            for required in rules.transaction_required {
                                let suffix = required.strip_prefix(&format!("{array_path}.")).unwrap_or(required);
                                if path::get(item, suffix).is_none() {
                                    errors.push(format!("transaction[{index}] missing required field: {suffix}"));
                                }
                            }
                        }
                    }
                    Some(Value::Object(_)) => {
                        for required in rules.transaction_required {
                            if !path::exists(body, required) {
                                errors.push(format!("missing required field: {required}"));
                            }
                        }
                    }
                    Some(_) | None => {
                        if !rules.transaction_required.is_empty() {
                            errors.push(format!("missing required block: {array_path}"));
                        }
                    }
                }
            }

            if !path::exists(body, "_metadata") {
                warnings.push("message has no _metadata subtree".to_string());
            }
        }
    }

    ValidationResult { valid: errors.is_empty(), errors, warnings, timestamp: Utc::now() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_pain001_passes() {
        let body = json!({
            "GrpHdr": {"MsgId": "M1", "CreDtTm": "2026-01-01T00:00:00Z", "NbOfTxs": "1"},
            "PmtInf": [{"PmtId": {"EndToEndId": "E1"}, "Amt": {"InstdAmt": "100.00"}, "Cdtr": {"Nm": "Alice"}}],
        });
        let result = validate("pain.001", &body);
        assert!(result.valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn missing_header_field_is_an_error() {
        let body = json!({"PmtInf": []});
        let result = validate("pain.001", &body);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("GrpHdr.MsgId")));
    }

    #[test]
    fn missing_metadata_is_only_a_warning() {
        let body = json!({
            "GrpHdr": {"MsgId": "M1", "CreDtTm": "2026-01-01T00:00:00Z", "NbOfTxs": "1"},
            "PmtInf": [{"PmtId": {"EndToEndId": "E1"}, "Amt": {"InstdAmt": "100.00"}, "Cdtr": {"Nm": "Alice"}}],
        });
        let result = validate("pain.001", &body);
        assert!(result.valid);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn transaction_missing_required_field_is_reported_per_index() {
        let body = json!({
            "GrpHdr": {"MsgId": "M1", "CreDtTm": "2026-01-01T00:00:00Z", "NbOfTxs": "1"},
            "PmtInf": [{"PmtId": {"EndToEndId": "E1"}, "Amt": {"InstdAmt": "100.00"}, "Cdtr": {"Nm": "Alice"}}, {"PmtId": {}}],
        });
        let result = validate("pain.001", &body);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("transaction[1]")));
    }

    #[test]
    fn unsupported_kind_is_an_error() {
        let result = validate("pacs.999", &json!({}));
        assert!(!result.valid);
    }
}
