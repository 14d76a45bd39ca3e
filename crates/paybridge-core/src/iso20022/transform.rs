//! Built-in transformations (§4.D), used when no `MappingDocument` is
//! effective for the flow's direction. Each is a pure function of the
//! source message plus the effective [`FlowContext`]; none reads I/O.

use serde_json::{json, Value};

use crate::mapping::path;
use crate::types::FlowContext;

/// Emission rules common to every generated message (§4.D): `MsgId`,
/// `CreDtTm` (RFC 3339), `NbOfTxs`, and a `_metadata` subtree.
fn stamp_header(mut body: Value, ctx: &FlowContext, nb_of_txs: &str, original_message_id: &str) -> Value {
    path::set(&mut body, "GrpHdr.MsgId", json!(ctx.correlation_id));
    path::set(&mut body, "GrpHdr.CreDtTm", json!(chrono::Utc::now().to_rfc3339()));
    path::set(&mut body, "GrpHdr.NbOfTxs", json!(nb_of_txs));
    path::set(
        &mut body,
        "_metadata",
        json!({
            "originalMessageId": original_message_id,
            "correlationId": ctx.correlation_id,
            "direction": "RESPONSE",
            "generatedAt": chrono::Utc::now().to_rfc3339(),
        }),
    );
    body
}

fn agent_block(source: &Value, instructing_path: &str, instructed_path: &str) -> Value {
    json!({
        "InstgAgt": path::get(source, instructing_path).cloned().unwrap_or(Value::Null),
        "InstdAgt": path::get(source, instructed_path).cloned().unwrap_or(Value::Null),
    })
}

/// pain.001 → pacs.008: customer credit transfer initiation to interbank
/// credit transfer.
pub fn pain001_to_pacs008(source: &Value, ctx: &FlowContext) -> Value {
    let original_message_id = path::get(source, "GrpHdr.MsgId").and_then(Value::as_str).unwrap_or_default().to_string();
    let nb_of_txs = path::get(source, "GrpHdr.NbOfTxs").and_then(Value::as_str).unwrap_or("1").to_string();
    let tx_entries = path::get(source, "PmtInf").cloned().unwrap_or(Value::Array(vec![]));
    let tx_list = match tx_entries {
        Value::Array(items) => items,
        other => vec![other],
    };

    let cdt_trf_tx_inf: Vec<Value> = tx_list
        .into_iter()
        .map(|tx| {
            json!({
                "PmtId": path::get(&tx, "PmtId").cloned().unwrap_or(Value::Null),
                "IntrBkSttlmAmt": path::get(&tx, "Amt.InstdAmt").cloned().unwrap_or(Value::Null),
                "Dbtr": path::get(&tx, "Dbtr").cloned().unwrap_or(Value::Null),
                "Cdtr": path::get(&tx, "Cdtr").cloned().unwrap_or(Value::Null),
                "DbtrAgt": path::get(&tx, "DbtrAgt").cloned().unwrap_or(Value::Null),
                "CdtrAgt": path::get(&tx, "CdtrAgt").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();

    let mut body = json!({
        "GrpHdr": agent_block(source, "GrpHdr.InstgAgt", "GrpHdr.InstdAgt"),
        "CdtTrfTxInf": cdt_trf_tx_inf,
    });
    body = stamp_header(body, ctx, &nb_of_txs, &original_message_id);
    body
}

/// Maps a clearing acknowledgement's group status to the reason code the
/// client-facing pain.002 carries alongside it (§7 propagation policy):
/// `ACSC` always carries `G000`, `RJCT` carries whatever reason the clearing
/// ack gave (falling back to the generic `NARR`).
fn reason_code_for(source: &Value, group_status: &str) -> String {
    if group_status == "RJCT" {
        path::get(source, "TxInfAndSts.StsRsnInf.Rsn.Cd")
            .or_else(|| path::get(source, "GrpHdr.StsRsnInf.Rsn.Cd"))
            .and_then(Value::as_str)
            .unwrap_or("NARR")
            .to_string()
    } else {
        "G000".to_string()
    }
}

fn pacs_ack_to_pain002(source: &Value, ctx: &FlowContext) -> Value {
    // `OrgnlMsgId` always traces back to the message that opened this flow,
    // not whatever the clearing ack happened to carry (it may carry nothing).
    let original_message_id = ctx.message_id.clone();
    let group_status = path::get(source, "TxInfAndSts.TxSts")
        .or_else(|| path::get(source, "GrpHdr.GrpSts"))
        .and_then(Value::as_str)
        .unwrap_or("ACSC")
        .to_string();
    let reason_code = reason_code_for(source, &group_status);

    let mut body = json!({
        "GrpHdr": {},
        "OrgnlGrpInfAndSts": {
            "OrgnlMsgId": original_message_id,
            "GrpSts": group_status,
            "StsRsnInf": {
                "Rsn": { "Cd": reason_code },
            },
        },
    });
    body = stamp_header(body, ctx, "1", &original_message_id);
    body
}

/// pacs.002 → pain.002: clearing acknowledgement to client-facing payment
/// status report.
pub fn pacs002_to_pain002(source: &Value, ctx: &FlowContext) -> Value {
    pacs_ack_to_pain002(source, ctx)
}

/// pacs.004 → pain.002: payment return to client-facing payment status
/// report.
pub fn pacs004_to_pain002(source: &Value, ctx: &FlowContext) -> Value {
    let mut body = pacs_ack_to_pain002(source, ctx);
    path::set(&mut body, "OrgnlGrpInfAndSts.GrpSts", json!("RTND"));
    path::set(&mut body, "OrgnlGrpInfAndSts.StsRsnInf.Rsn.Cd", json!("NARR"));
    body
}

/// camt.054 → camt.053: debit/credit notification to account statement.
pub fn camt054_to_camt053(source: &Value, ctx: &FlowContext) -> Value {
    let original_message_id = path::get(source, "GrpHdr.MsgId").and_then(Value::as_str).unwrap_or_default().to_string();
    let entries = path::get(source, "Ntfctn.Ntry").cloned().unwrap_or(Value::Array(vec![]));

    let mut body = json!({
        "GrpHdr": {},
        "Stmt": {
            "Ntry": entries,
        },
    });
    body = stamp_header(body, ctx, "1", &original_message_id);
    body
}

/// camt.055 → pacs.007: customer payment cancellation request to interbank
/// payment return.
pub fn camt055_to_pacs007(source: &Value, ctx: &FlowContext) -> Value {
    let original_message_id = path::get(source, "Assgnmt.Id").and_then(Value::as_str).unwrap_or_default().to_string();
    let tx_inf = path::get(source, "Undrlyg").cloned().unwrap_or(Value::Array(vec![]));

    let mut body = json!({
        "GrpHdr": {},
        "TxInf": tx_inf,
    });
    body = stamp_header(body, ctx, "1", &original_message_id);
    body
}

/// camt.056 → pacs.028: FI to FI payment cancellation request to payment
/// status request.
pub fn camt056_to_pacs028(source: &Value, ctx: &FlowContext) -> Value {
    let original_message_id = path::get(source, "Assgnmt.Id").and_then(Value::as_str).unwrap_or_default().to_string();
    let tx_inf = path::get(source, "Undrlyg").cloned().unwrap_or(Value::Array(vec![]));

    let mut body = json!({
        "GrpHdr": {},
        "TxInf": tx_inf,
    });
    body = stamp_header(body, ctx, "1", &original_message_id);
    body
}

/// Looks up the built-in transformation for `(source_kind, target_kind)`, if
/// one is defined (§4.D).
pub fn lookup(source_kind: &str, target_kind: &str) -> Option<fn(&Value, &FlowContext) -> Value> {
    match (source_kind, target_kind) {
        ("pain.001", "pacs.008") => Some(pain001_to_pacs008),
        ("pacs.002", "pain.002") => Some(pacs002_to_pain002),
        ("pacs.004", "pain.002") => Some(pacs004_to_pain002),
        ("camt.054", "camt.053") => Some(camt054_to_camt053),
        ("camt.055", "pacs.007") => Some(camt055_to_pacs007),
        ("camt.056", "pacs.028") => Some(camt056_to_pacs028),
        _ => None,
    }
}
