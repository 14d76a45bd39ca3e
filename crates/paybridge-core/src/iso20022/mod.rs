//! The ISO 20022 Canonicalizer (component D): parses, validates, and emits
//! ISO 20022 messages in the canonical structured form from §3, and applies
//! the built-in transformations used when no `MappingDocument` is effective.

pub mod codec;
pub mod transform;
pub mod validate;

pub use codec::WireFormat;
pub use validate::ValidationResult;

use serde_json::Value;

use crate::error::PayBridgeError;
use crate::types::{FlowContext, Message};

/// The twelve message kinds the canonicalizer understands (§4.D).
pub const SUPPORTED_KINDS: &[&str] = &[
    "pain.001", "pain.002", "pacs.002", "pacs.004", "pacs.007", "pacs.008", "pacs.028", "camt.029", "camt.053",
    "camt.054", "camt.055", "camt.056",
];

/// Parses, validates, and emits ISO 20022 messages (§4.D). Stateless: every
/// method is a pure function of its arguments plus (for emission) wall-clock
/// time, so a single instance is freely shared across tenants.
#[derive(Debug, Default, Clone, Copy)]
pub struct Canonicalizer;

impl Canonicalizer {
    pub fn new() -> Self {
        Self
    }

    /// Decodes a wire body of `kind` into the structured [`Message`] tree
    /// (§3), without validating it.
    pub fn parse(&self, kind: &str, format: WireFormat, body: &str) -> Result<Message, PayBridgeError> {
        let decoded = codec::decode(format, body)?;
        let unwrapped = unwrap_single_root(decoded);
        Ok(Message::new(kind.to_string(), unwrapped))
    }

    /// Validates `message.body` against the required-key rules for its
    /// kind (§4.D). Never fails — an unsupported kind or missing field is
    /// reported in `ValidationResult.errors`, not as an `Err`.
    pub fn validate(&self, message: &Message) -> ValidationResult {
        validate::validate(&message.kind, &message.body)
    }

    /// Encodes `message.body` to the given wire format for emission.
    pub fn emit(&self, message: &Message, format: WireFormat) -> Result<String, PayBridgeError> {
        let wrapped = wrap_single_root(&message.kind, message.body.clone());
        codec::encode(format, &wrapped)
    }

    /// Applies the built-in transformation from `source.kind` to
    /// `target_kind`, if one is registered (§4.D). Returns `None` when no
    /// built-in transformation exists for the pair — callers fall back to an
    /// effective `MappingDocument`, or treat it as a configuration gap.
    pub fn transform(&self, source: &Message, target_kind: &str, ctx: &FlowContext) -> Option<Message> {
        let transform_fn = transform::lookup(&source.kind, target_kind)?;
        let body = transform_fn(&source.body, ctx);
        Some(Message::new(target_kind.to_string(), body))
    }
}

fn unwrap_single_root(value: Value) -> Value {
    match value {
        Value::Object(map) if map.len() == 1 => map.into_values().next().expect("checked len == 1"),
        other => other,
    }
}

fn wrap_single_root(kind: &str, body: Value) -> Value {
    let mut wrapper = serde_json::Map::new();
    wrapper.insert(kind.to_string(), body);
    Value::Object(wrapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, PolicyCoordinate, TenantId};
    use serde_json::json;

    fn ctx() -> FlowContext {
        FlowContext::new("M1", PolicyCoordinate::new(TenantId::from("T1"), Direction::Request))
    }

    #[test]
    fn parse_then_emit_json_round_trips() {
        let canonicalizer = Canonicalizer::new();
        let body = r#"{"pain.001": {"GrpHdr": {"MsgId": "M1", "CreDtTm": "2026-01-01T00:00:00Z", "NbOfTxs": "1"}}}"#;
        let message = canonicalizer.parse("pain.001", WireFormat::Json, body).unwrap();
        let emitted = canonicalizer.emit(&message, WireFormat::Json).unwrap();
        let reparsed = canonicalizer.parse("pain.001", WireFormat::Json, &emitted).unwrap();
        assert_eq!(message.body, reparsed.body);
    }

    #[test]
    fn validate_reports_missing_fields() {
        let canonicalizer = Canonicalizer::new();
        let message = Message::new("pain.001", json!({}));
        let result = canonicalizer.validate(&message);
        assert!(!result.valid);
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn transform_applies_built_in_pair() {
        let canonicalizer = Canonicalizer::new();
        let source = Message::new(
            "pain.001",
            json!({"GrpHdr": {"MsgId": "ORIG-1", "NbOfTxs": "1"}, "PmtInf": [{"PmtId": {"EndToEndId": "E1"}}]}),
        );
        let transformed = canonicalizer.transform(&source, "pacs.008", &ctx()).unwrap();
        assert_eq!(transformed.kind, "pacs.008");
    }

    #[test]
    fn transform_returns_none_for_unregistered_pair() {
        let canonicalizer = Canonicalizer::new();
        let source = Message::new("pacs.008", json!({}));
        assert!(canonicalizer.transform(&source, "pain.001", &ctx()).is_none());
    }
}
