//! Wire encoding (§4.D): inbound/outbound bodies are accepted and emitted as
//! either JSON or XML; internally every message is the structured tree from
//! §3 regardless of wire form.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};
use std::io::Cursor;

use crate::error::PayBridgeError;

/// The wire content type declared by the envelope (§6), selecting which
/// codec decodes the inbound body and encodes the outbound one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    Xml,
}

pub fn decode(format: WireFormat, body: &str) -> Result<Value, PayBridgeError> {
    match format {
        WireFormat::Json => {
            serde_json::from_str(body).map_err(|e| PayBridgeError::Validation(format!("invalid JSON body: {e}")))
        }
        WireFormat::Xml => decode_xml(body),
    }
}

pub fn encode(format: WireFormat, body: &Value) -> Result<String, PayBridgeError> {
    match format {
        WireFormat::Json => {
            serde_json::to_string(body).map_err(|e| PayBridgeError::Internal(format!("failed to encode JSON: {e}")))
        }
        WireFormat::Xml => encode_xml(body),
    }
}

/// Encodes a structured value tree as XML. The root object's single key
/// becomes the document element; nested objects become elements, arrays
/// repeat the same tag for each element, and scalars become element text.
/// Full XSD conformance (attribute namespaces, ordering constraints) is out
/// of scope (§4.D) — this is a generic structural mapping.
fn encode_xml(body: &Value) -> Result<String, PayBridgeError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(quick_xml::events::BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| PayBridgeError::Internal(format!("failed to write XML declaration: {e}")))?;

    match body {
        Value::Object(map) if map.len() == 1 => {
            let (root_name, root_value) = map.iter().next().expect("checked len == 1");
            write_element(&mut writer, root_name, root_value)?;
        }
        other => write_element(&mut writer, "Document", other)?,
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| PayBridgeError::Internal(format!("non-UTF8 XML output: {e}")))
}

fn write_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, value: &Value) -> Result<(), PayBridgeError> {
    match value {
        Value::Object(map) => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(|e| PayBridgeError::Internal(format!("failed to write <{name}>: {e}")))?;
            for (key, child) in map {
                write_element(writer, key, child)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(|e| PayBridgeError::Internal(format!("failed to write </{name}>: {e}")))?;
        }
        Value::Array(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
        }
        Value::Null => {
            writer
                .write_event(Event::Empty(BytesStart::new(name)))
                .map_err(|e| PayBridgeError::Internal(format!("failed to write <{name}/>: {e}")))?;
        }
        scalar => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(|e| PayBridgeError::Internal(format!("failed to write <{name}>: {e}")))?;
            let text = scalar_to_text(scalar);
            writer
                .write_event(Event::Text(BytesText::new(&text)))
                .map_err(|e| PayBridgeError::Internal(format!("failed to write text in <{name}>: {e}")))?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(|e| PayBridgeError::Internal(format!("failed to write </{name}>: {e}")))?;
        }
    }
    Ok(())
}

fn scalar_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Decodes an XML document into a single-keyed object tree wrapping the root
/// element, the inverse of [`encode_xml`]. Sibling elements sharing a tag
/// collapse into a JSON array; a leaf element with only text content becomes
/// a string.
fn decode_xml(body: &str) -> Result<Value, PayBridgeError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<(String, Map<String, Value>)> = Vec::new();
    let mut root: Option<(String, Value)> = None;
    let mut pending_text = String::new();

    loop {
        match reader.read_event().map_err(|e| PayBridgeError::Validation(format!("invalid XML body: {e}")))? {
            Event::Start(start) => {
                let name = element_name(&start)?;
                stack.push((name, Map::new()));
                pending_text.clear();
            }
            Event::Empty(start) => {
                let name = element_name(&start)?;
                insert_child(&mut stack, &mut root, name, Value::Null)?;
            }
            Event::Text(text) => {
                pending_text.push_str(
                    &text
                        .unescape()
                        .map_err(|e| PayBridgeError::Validation(format!("invalid XML text: {e}")))?,
                );
            }
            Event::End(_) => {
                let (name, children) = stack.pop().ok_or_else(|| {
                    PayBridgeError::Validation("XML body has an unmatched closing tag".to_string())
                })?;
                let value = if children.is_empty() {
                    Value::String(std::mem::take(&mut pending_text))
                } else {
                    Value::Object(children)
                };
                pending_text.clear();
                insert_child(&mut stack, &mut root, name, value)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let (root_name, root_value) = root.ok_or_else(|| PayBridgeError::Validation("XML body has no root element".to_string()))?;
    let mut wrapper = Map::new();
    wrapper.insert(root_name, root_value);
    Ok(Value::Object(wrapper))
}

fn element_name(start: &BytesStart) -> Result<String, PayBridgeError> {
    String::from_utf8(start.name().as_ref().to_vec())
        .map_err(|e| PayBridgeError::Validation(format!("non-UTF8 element name: {e}")))
}

fn insert_child(
    stack: &mut [(String, Map<String, Value>)],
    root: &mut Option<(String, Value)>,
    name: String,
    value: Value,
) -> Result<(), PayBridgeError> {
    match stack.last_mut() {
        Some((_, parent)) => {
            match parent.get_mut(&name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let previous = existing.clone();
                    parent.insert(name, Value::Array(vec![previous, value]));
                }
                None => {
                    parent.insert(name, value);
                }
            }
            Ok(())
        }
        None => {
            *root = Some((name, value));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_preserves_structure() {
        let body = json!({"Document": {"GrpHdr": {"MsgId": "M1", "NbOfTxs": "1"}}});
        let encoded = encode(WireFormat::Json, &body).unwrap();
        let decoded = decode(WireFormat::Json, &encoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn xml_round_trip_preserves_scalar_leaves() {
        let body = json!({"Document": {"GrpHdr": {"MsgId": "M1", "NbOfTxs": "1"}}});
        let encoded = encode_xml(&body).unwrap();
        assert!(encoded.contains("<MsgId>M1</MsgId>"));
        let decoded = decode_xml(&encoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn xml_repeated_siblings_collapse_to_array() {
        let xml = "<Document><Tx><Id>1</Id></Tx><Tx><Id>2</Id></Tx></Document>";
        let decoded = decode_xml(xml).unwrap();
        let txs = path_get(&decoded, &["Document", "Tx"]);
        assert!(matches!(txs, Value::Array(items) if items.len() == 2));
    }

    fn path_get<'a>(value: &'a Value, path: &[&str]) -> &'a Value {
        let mut current = value;
        for segment in path {
            current = &current[*segment];
        }
        current
    }
}
