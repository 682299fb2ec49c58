//! Subscription fingerprints
//!
//! A fingerprint canonically identifies a subscription's query shape:
//! `"<table>.<index>[<left>:<right>:<dir>][:<limit>]"`. Repeated subscribe
//! calls from one connection with the same fingerprint return the existing
//! handle, and the fingerprint doubles as the wire-visible `subId`.

use tessera_core::value::Value;

/// Literal image of a boundary value inside a fingerprint
fn literal(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fingerprint of a single-row subscription (`limit` 1, ascending)
pub fn row(table: &str, index: &str, value: &Value) -> String {
    format!("{}.{}[{}:None:1][:1]", table, index, literal(value))
}

/// Fingerprint of a range subscription
pub fn range(
    table: &str,
    index: &str,
    left: &Value,
    right: &Value,
    desc: bool,
    limit: usize,
) -> String {
    let dir = if desc { -1 } else { 1 };
    format!(
        "{}.{}[{}:{}:{}][:{}]",
        table,
        index,
        literal(left),
        literal(right),
        dir,
        limit
    )
}
