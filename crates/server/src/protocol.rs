//! Wire message surface
//!
//! Messages arrive already framed and decoded by the external pipeline; the
//! core sees JSON arrays:
//!
//! - `["rpc", systemName, arg₁, …]` → `["rsp", payload]`
//! - `["sub", component, "get", indexColumn, value]` → `["subOk", subId, row]`
//! - `["sub", component, "range", indexColumn, left, right, limit, desc, force]`
//!   → `["subOk", subId, [rows]]`
//! - `["unsub", subId]` → no reply
//! - `["updt", subId, { rowId: row-or-null, ... }]`: server-initiated push
//!
//! Errors travel in the `rsp` envelope as `{"error": code, "message": …}`.

use serde_json::{json, Value as Json};
use tessera_core::error::{Result, TesseraError};
use tessera_core::row::Row;
use tessera_core::types::RowId;

/// Decoded client request
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// System invocation
    Rpc {
        /// System name
        system: String,
        /// Raw arguments, forwarded to the handler
        args: Vec<Json>,
    },
    /// Row subscription
    SubRow {
        /// Component name
        table: String,
        /// Indexed lookup column
        column: String,
        /// Pinned value (raw literal, typed at dispatch)
        value: Json,
    },
    /// Range subscription
    SubRange {
        /// Component name
        table: String,
        /// Indexed range column
        column: String,
        /// Lower bound literal; `null` means `-∞`
        left: Json,
        /// Upper bound literal; `null` means `+∞`
        right: Json,
        /// Cap on reported rows
        limit: usize,
        /// Traverse descending
        desc: bool,
        /// Materialize a handle even when the snapshot is empty
        force: bool,
    },
    /// Drop a subscription handle
    Unsub {
        /// Fingerprint returned by `subOk`
        sub_id: String,
    },
}

impl ClientMessage {
    /// Parse a decoded wire array
    pub fn parse(raw: &Json) -> Result<Self> {
        let parts = raw
            .as_array()
            .ok_or_else(|| TesseraError::query("message is not an array"))?;
        let kind = parts
            .first()
            .and_then(Json::as_str)
            .ok_or_else(|| TesseraError::query("message lacks a kind tag"))?;

        match kind {
            "rpc" => {
                let system = parts
                    .get(1)
                    .and_then(Json::as_str)
                    .ok_or_else(|| TesseraError::query("rpc lacks a system name"))?;
                Ok(ClientMessage::Rpc {
                    system: system.to_string(),
                    args: parts[2..].to_vec(),
                })
            }
            "sub" => Self::parse_sub(parts),
            "unsub" => {
                let sub_id = parts
                    .get(1)
                    .and_then(Json::as_str)
                    .ok_or_else(|| TesseraError::query("unsub lacks a subscription id"))?;
                Ok(ClientMessage::Unsub {
                    sub_id: sub_id.to_string(),
                })
            }
            other => Err(TesseraError::query(format!(
                "unknown message kind {:?}",
                other
            ))),
        }
    }

    fn parse_sub(parts: &[Json]) -> Result<Self> {
        let table = parts
            .get(1)
            .and_then(Json::as_str)
            .ok_or_else(|| TesseraError::query("sub lacks a component name"))?
            .to_string();
        let mode = parts
            .get(2)
            .and_then(Json::as_str)
            .ok_or_else(|| TesseraError::query("sub lacks a mode"))?;
        let column = parts
            .get(3)
            .and_then(Json::as_str)
            .ok_or_else(|| TesseraError::query("sub lacks an index column"))?
            .to_string();

        match mode {
            "get" => Ok(ClientMessage::SubRow {
                table,
                column,
                value: parts
                    .get(4)
                    .cloned()
                    .ok_or_else(|| TesseraError::query("row sub lacks a value"))?,
            }),
            "range" => {
                let limit = parts
                    .get(6)
                    .and_then(Json::as_u64)
                    .ok_or_else(|| TesseraError::query("range sub lacks a limit"))?;
                Ok(ClientMessage::SubRange {
                    table,
                    column,
                    left: parts.get(4).cloned().unwrap_or(Json::Null),
                    right: parts.get(5).cloned().unwrap_or(Json::Null),
                    limit: limit as usize,
                    desc: parts.get(7).and_then(Json::as_bool).unwrap_or(false),
                    force: parts.get(8).and_then(Json::as_bool).unwrap_or(false),
                })
            }
            other => Err(TesseraError::query(format!(
                "unknown sub mode {:?}",
                other
            ))),
        }
    }
}

/// Encoded server reply or push
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// RPC response payload
    Rsp {
        /// Handler payload; `null` when the System emitted nothing
        payload: Json,
    },
    /// Structured failure inside the `rsp` envelope
    Error {
        /// Stable error code
        code: String,
        /// Human-readable detail
        message: String,
    },
    /// Subscription established (or reported null)
    SubOk {
        /// Fingerprint handle
        sub_id: Option<String>,
        /// Snapshot: a row/`null` for row subs, an array for range subs
        snapshot: Json,
    },
    /// Subscription delta push
    Updt {
        /// Fingerprint handle
        sub_id: String,
        /// Latest state per row; `null` rows left the subscription
        rows: Vec<(RowId, Option<Row>)>,
    },
    /// The broker dropped a subscription under back-pressure
    Evicted {
        /// Fingerprint handle
        sub_id: String,
    },
}

impl ServerMessage {
    /// Structured failure from an error value
    pub fn from_error(e: &TesseraError) -> Self {
        ServerMessage::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }

    /// Wire image
    pub fn to_json(&self) -> Json {
        match self {
            ServerMessage::Rsp { payload } => json!(["rsp", payload]),
            ServerMessage::Error { code, message } => {
                json!(["rsp", {"error": code, "message": message}])
            }
            ServerMessage::SubOk { sub_id, snapshot } => {
                json!(["subOk", sub_id, snapshot])
            }
            ServerMessage::Updt { sub_id, rows } => {
                let mut map = serde_json::Map::with_capacity(rows.len());
                for (id, row) in rows {
                    map.insert(
                        id.to_string(),
                        row.as_ref().map(Row::to_json).unwrap_or(Json::Null),
                    );
                }
                json!(["updt", sub_id, map])
            }
            ServerMessage::Evicted { sub_id } => {
                json!(["rsp", {"error": "SubscriptionEvicted", "message": sub_id}])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rpc() {
        let msg = ClientMessage::parse(&json!(["rpc", "use_hp", 1, "x"])).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Rpc {
                system: "use_hp".into(),
                args: vec![json!(1), json!("x")],
            }
        );
    }

    #[test]
    fn test_parse_row_sub() {
        let msg = ClientMessage::parse(&json!(["sub", "HP", "get", "owner", 1])).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubRow {
                table: "HP".into(),
                column: "owner".into(),
                value: json!(1),
            }
        );
    }

    #[test]
    fn test_parse_range_sub_with_open_bounds() {
        let msg =
            ClientMessage::parse(&json!(["sub", "Position", "range", "x", null, 10, 100, true, true]))
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubRange {
                table: "Position".into(),
                column: "x".into(),
                left: Json::Null,
                right: json!(10),
                limit: 100,
                desc: true,
                force: true,
            }
        );
    }

    #[test]
    fn test_parse_unsub() {
        let msg = ClientMessage::parse(&json!(["unsub", "HP.owner[1:None:1][:1]"])).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Unsub {
                sub_id: "HP.owner[1:None:1][:1]".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ClientMessage::parse(&json!({"not": "an array"})).is_err());
        assert!(ClientMessage::parse(&json!([42])).is_err());
        assert!(ClientMessage::parse(&json!(["teleport"])).is_err());
        assert!(ClientMessage::parse(&json!(["sub", "HP", "nearest", "owner"])).is_err());
    }

    #[test]
    fn test_error_envelope_shape() {
        let e = TesseraError::unknown_system("ghost");
        let json = ServerMessage::from_error(&e).to_json();
        assert_eq!(json[0], "rsp");
        assert_eq!(json[1]["error"], "UnknownSystem");
    }

    #[test]
    fn test_rsp_shape() {
        let json = ServerMessage::Rsp {
            payload: json!({"hp": 8}),
        }
        .to_json();
        assert_eq!(json, json!(["rsp", {"hp": 8}]));
    }
}
