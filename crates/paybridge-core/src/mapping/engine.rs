//! The payload mapping engine (component B): applies a [`MappingDocument`]
//! to a source payload in the fixed clause order from SPEC_FULL.md §4.B.

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::PayBridgeError;
use crate::types::{Generator, MappingClause, MappingDocument, TransformFn};

use super::expr;
use super::path;

/// Stateful only in the sequential auto-generation counters, which are
/// monotonic per (tenant, document name) per §4.B auto-generation semantics.
/// Everything else about application is pure.
#[derive(Debug, Default)]
pub struct MappingEngine {
    sequence_counters: DashMap<(String, String), u64>,
}

impl MappingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `document` to `source`, returning the target tree. Individual
    /// clause failures are recoverable: they are logged and skipped, never
    /// aborting the whole document (§4.B, §7 `MAPPING_FAILED` is reserved for
    /// the rare case the document itself is structurally invalid).
    pub fn apply(
        &self,
        document: &MappingDocument,
        tenant_id: &str,
        source: &Value,
    ) -> Result<Value, PayBridgeError> {
        document.validate().map_err(|reason| PayBridgeError::MappingFailed {
            document: document.name.clone(),
            reason,
        })?;

        let mut target = Value::Object(serde_json::Map::new());

        self.apply_field_mappings(document, source, &mut target);
        self.apply_value_assignments(document, source, &mut target);
        self.apply_derived_values(document, source, &mut target);
        self.apply_auto_generation(document, tenant_id, &mut target);
        self.apply_conditionals(document, source, &mut target);
        self.apply_transformations(document, &mut target);
        self.apply_default_values(document, &mut target);

        Ok(target)
    }

    fn apply_field_mappings(&self, document: &MappingDocument, source: &Value, target: &mut Value) {
        for clause in &document.clauses {
            if let MappingClause::FieldMapping { source_path, target_path } = clause {
                match path::get(source, source_path) {
                    Some(value) => path::set(target, target_path, value.clone()),
                    None => warn!(document = %document.name, path = %source_path, "field mapping source path not found"),
                }
            }
        }
    }

    fn apply_value_assignments(&self, document: &MappingDocument, source: &Value, target: &mut Value) {
        for clause in &document.clauses {
            if let MappingClause::ValueAssignment { target_path, template } = clause {
                let value = expr::render_template(template, source);
                path::set(target, target_path, value);
            }
        }
    }

    fn apply_derived_values(&self, document: &MappingDocument, source: &Value, target: &mut Value) {
        for clause in &document.clauses {
            if let MappingClause::DerivedValue { target_path, expression } = clause {
                match expr::eval_expression(expression, source) {
                    Ok(value) => path::set(target, target_path, value),
                    Err(reason) => warn!(
                        document = %document.name,
                        expression = %expression,
                        reason = %reason,
                        "derived value clause failed, skipping"
                    ),
                }
            }
        }
    }

    fn apply_auto_generation(&self, document: &MappingDocument, tenant_id: &str, target: &mut Value) {
        for clause in &document.clauses {
            if let MappingClause::AutoGeneration { target_path, generator } = clause {
                let value = self.generate(document, tenant_id, generator);
                path::set(target, target_path, value);
            }
        }
    }

    fn generate(&self, document: &MappingDocument, tenant_id: &str, generator: &Generator) -> Value {
        match generator {
            Generator::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
            Generator::Timestamp => {
                Value::String(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
            }
            Generator::Sequential { prefix, suffix, length } => {
                let key = (tenant_id.to_string(), document.name.clone());
                let mut counter = self.sequence_counters.entry(key).or_insert(0);
                let current = *counter;
                // Wrap only after exhausting the numeric space (§4.B).
                *counter = counter.wrapping_add(1);
                Value::String(format!("{prefix}{current:0width$}{suffix}", width = length))
            }
        }
    }

    fn apply_conditionals(&self, document: &MappingDocument, source: &Value, target: &mut Value) {
        for clause in &document.clauses {
            if let MappingClause::Conditional { target_path, predicate, value_template } = clause {
                match expr::eval_predicate(predicate, source) {
                    Ok(true) => {
                        let value = expr::render_template(value_template, source);
                        // Last writer wins: declaration-order iteration plus
                        // unconditional overwrite satisfies this (§4.B).
                        path::set(target, target_path, value);
                    }
                    Ok(false) => {}
                    Err(reason) => warn!(
                        document = %document.name,
                        predicate = %predicate,
                        reason = %reason,
                        "conditional predicate failed, skipping"
                    ),
                }
            }
        }
    }

    fn apply_transformations(&self, document: &MappingDocument, target: &mut Value) {
        for clause in &document.clauses {
            if let MappingClause::Transformation { target_path, function } = clause {
                let current = path::get(target, target_path).cloned();
                if let Some(current) = current {
                    match apply_transform_fn(function, &current) {
                        Ok(new_value) => path::set(target, target_path, new_value),
                        Err(reason) => warn!(
                            document = %document.name,
                            path = %target_path,
                            reason = %reason,
                            "transformation clause failed, skipping"
                        ),
                    }
                }
            }
        }
    }

    fn apply_default_values(&self, document: &MappingDocument, target: &mut Value) {
        for clause in &document.clauses {
            if let MappingClause::DefaultValue { target_path, value } = clause {
                if !path::exists(target, target_path) {
                    path::set(target, target_path, value.clone());
                }
            }
        }
    }
}

fn apply_transform_fn(function: &TransformFn, value: &Value) -> Result<Value, String> {
    let as_str = match value {
        Value::String(s) => s.clone(),
        Value::Null => return Ok(Value::Null),
        other => other.to_string(),
    };
    let transformed = match function {
        TransformFn::Uppercase => as_str.to_uppercase(),
        TransformFn::Lowercase => as_str.to_lowercase(),
        TransformFn::Trim => as_str.trim().to_string(),
        TransformFn::Pad { width, char } => {
            if as_str.len() >= *width {
                as_str
            } else {
                let padding: String = std::iter::repeat(*char).take(width - as_str.len()).collect();
                format!("{padding}{as_str}")
            }
        }
        TransformFn::Substring { start, end } => {
            let chars: Vec<char> = as_str.chars().collect();
            let start = (*start).min(chars.len());
            let end = end.unwrap_or(chars.len()).min(chars.len()).max(start);
            chars[start..end].iter().collect()
        }
        TransformFn::RegexReplace { pattern, replacement } => {
            let re = Regex::new(pattern).map_err(|e| format!("invalid regex '{pattern}': {e}"))?;
            re.replace_all(&as_str, replacement.as_str()).to_string()
        }
    };
    Ok(Value::String(transformed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateMatch, Direction};
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(clauses: Vec<MappingClause>) -> MappingDocument {
        MappingDocument {
            name: "test-doc".to_string(),
            coordinate: CoordinateMatch::default(),
            direction: Direction::Request,
            priority: 50,
            active: true,
            version: 1,
            clauses,
        }
    }

    #[test]
    fn field_mapping_copies_value() {
        let engine = MappingEngine::new();
        let document = doc(vec![MappingClause::FieldMapping {
            source_path: "GrpHdr.MsgId".to_string(),
            target_path: "FIToFICustomerCreditTransfer.GrpHdr.MsgId".to_string(),
        }]);
        let source = json!({"GrpHdr": {"MsgId": "M1"}});
        let result = engine.apply(&document, "T1", &source).unwrap();
        assert_eq!(
            path::get(&result, "FIToFICustomerCreditTransfer.GrpHdr.MsgId"),
            Some(&json!("M1"))
        );
    }

    #[test]
    fn sequential_auto_generation_advances_counter() {
        let engine = MappingEngine::new();
        let document = doc(vec![MappingClause::AutoGeneration {
            target_path: "PmtId.TxId".to_string(),
            generator: Generator::Sequential {
                prefix: "TXN-".to_string(),
                suffix: String::new(),
                length: 6,
            },
        }]);
        engine
            .sequence_counters
            .insert(("T1".to_string(), "test-doc".to_string()), 42);
        let source = json!({});
        let result = engine.apply(&document, "T1", &source).unwrap();
        assert_eq!(path::get(&result, "PmtId.TxId"), Some(&json!("TXN-000042")));

        let result2 = engine.apply(&document, "T1", &source).unwrap();
        assert_eq!(path::get(&result2, "PmtId.TxId"), Some(&json!("TXN-000043")));
    }

    #[test]
    fn clause_order_applies_transformation_after_derived_value() {
        let engine = MappingEngine::new();
        let document = doc(vec![
            MappingClause::DerivedValue {
                target_path: "Name".to_string(),
                expression: "${source.name}".to_string(),
            },
            MappingClause::Transformation {
                target_path: "Name".to_string(),
                function: TransformFn::Uppercase,
            },
        ]);
        let source = json!({"name": "alice"});
        let result = engine.apply(&document, "T1", &source).unwrap();
        assert_eq!(path::get(&result, "Name"), Some(&json!("ALICE")));
    }

    #[test]
    fn default_value_only_applies_when_absent() {
        let engine = MappingEngine::new();
        let document = doc(vec![
            MappingClause::ValueAssignment {
                target_path: "Status".to_string(),
                template: "\"EXPLICIT\"".to_string(),
            },
            MappingClause::DefaultValue {
                target_path: "Status".to_string(),
                value: json!("DEFAULT"),
            },
            MappingClause::DefaultValue {
                target_path: "Fallback".to_string(),
                value: json!("DEFAULT"),
            },
        ]);
        let source = json!({});
        let result = engine.apply(&document, "T1", &source).unwrap();
        assert_eq!(path::get(&result, "Status"), Some(&json!("EXPLICIT")));
        assert_eq!(path::get(&result, "Fallback"), Some(&json!("DEFAULT")));
    }

    #[test]
    fn conditional_last_writer_wins_in_declaration_order() {
        let engine = MappingEngine::new();
        let document = doc(vec![
            MappingClause::Conditional {
                target_path: "Tier".to_string(),
                predicate: "${source.amount} > 0".to_string(),
                value_template: "\"LOW\"".to_string(),
            },
            MappingClause::Conditional {
                target_path: "Tier".to_string(),
                predicate: "${source.amount} > 1000".to_string(),
                value_template: "\"HIGH\"".to_string(),
            },
        ]);
        let source = json!({"amount": 5000});
        let result = engine.apply(&document, "T1", &source).unwrap();
        assert_eq!(path::get(&result, "Tier"), Some(&json!("HIGH")));
    }

    #[test]
    fn mapping_is_deterministic_for_repeated_application() {
        let engine = MappingEngine::new();
        let document = doc(vec![MappingClause::FieldMapping {
            source_path: "a".to_string(),
            target_path: "b".to_string(),
        }]);
        let source = json!({"a": "value"});
        let first = engine.apply(&document, "T1", &source).unwrap();
        let second = engine.apply(&document, "T1", &source).unwrap();
        assert_eq!(first, second);
    }

    proptest! {
        /// §8 property 2: applying the same non-stateful mapping document
        /// (no `AutoGeneration` clauses) to the same source is deterministic,
        /// regardless of engine instance or value content.
        #[test]
        fn mapping_without_auto_generation_is_deterministic(value in "[a-zA-Z0-9]{0,32}") {
            let document = doc(vec![
                MappingClause::FieldMapping { source_path: "a".to_string(), target_path: "b".to_string() },
                MappingClause::Transformation { target_path: "b".to_string(), function: TransformFn::Uppercase },
            ]);
            let source = json!({"a": value});

            let first_engine = MappingEngine::new();
            let second_engine = MappingEngine::new();
            let first = first_engine.apply(&document, "T1", &source).unwrap();
            let second = second_engine.apply(&document, "T1", &source).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
