//! IPC wire protocol: newline-delimited JSON request/response objects over a
//! unix stream socket. Requests carry `method`, optional `params`, and an
//! integer `id`; responses echo the `id` and carry exactly one of `result`
//! or `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ERR_INVALID_REQUEST: i32 = -32600;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;
pub const ERR_NOT_FOUND: i32 = -32001;

pub const METHOD_GET_REALTIME_STATS: &str = "get_realtime_stats";
pub const METHOD_GET_HISTORICAL_STATS: &str = "get_historical_stats";
pub const METHOD_GET_STATUS: &str = "get_status";
pub const METHOD_ADD_PORT: &str = "add_port";
pub const METHOD_REMOVE_PORT: &str = "remove_port";
pub const METHOD_LIST_PORTS: &str = "list_ports";
pub const METHOD_FLUSH_STATS: &str = "flush_stats";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: i64,
}

impl Response {
    pub fn success(id: i64, result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: i64, code: i32, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// ========== Request parameters ==========

/// Single-port operations (`get_realtime_stats`, `add_port`, `remove_port`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortParams {
    pub port: u16,
}

/// Historical queries. Dates are `YYYY-MM-DD`, inclusive on both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalParams {
    pub port: u16,
    pub start_date: String,
    pub end_date: String,
}

// ========== Response payloads ==========

/// One port's counters at a sampling instant, with derived byte rates. This
/// is both the collector's published snapshot entry and the
/// `get_realtime_stats` result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSample {
    pub port: u16,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    /// Currently tracked connections touching this port.
    pub connections: u64,
    /// Bytes per second since the previous sample.
    pub rx_rate: f64,
    pub tx_rate: f64,
}

/// Aggregated answer to `get_historical_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoricalStats {
    pub port: u16,
    pub start_date: String,
    pub end_date: String,
    pub total_rx: u64,
    pub total_tx: u64,
    pub total_bytes: u64,
    pub peak_rx_rate: u64,
    pub peak_tx_rate: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub daily_stats: Vec<DayStats>,
}

/// One day's persisted bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayStats {
    pub date: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub connections: u64,
    pub peak_rx_rate: u64,
    pub peak_tx_rate: u64,
}

/// A monitored port and its optional human label from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub port: u16,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub running: bool,
    pub uptime: String,
    /// RFC 3339 daemon start time.
    pub start_time: String,
    pub monitored_ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_infos: Vec<PortInfo>,
    pub data_dir: String,
    pub retention_days: u32,
    pub socket_path: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPortsResult {
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip_without_params() {
        let req: Request = serde_json::from_str(r#"{"method":"get_status","id":3}"#).unwrap();
        assert_eq!(req.method, "get_status");
        assert!(req.params.is_null());
        assert_eq!(req.id, 3);

        let encoded = serde_json::to_string(&req).unwrap();
        assert!(!encoded.contains("params"));
    }

    #[test]
    fn response_carries_result_xor_error() {
        let ok = Response::success(1, serde_json::json!({"ports": [80]}));
        let encoded = serde_json::to_string(&ok).unwrap();
        assert!(encoded.contains("result"));
        assert!(!encoded.contains("error"));

        let err = Response::failure(2, ERR_METHOD_NOT_FOUND, "method not found");
        let encoded = serde_json::to_string(&err).unwrap();
        assert!(!encoded.contains("result"));
        assert!(encoded.contains("-32601"));
    }
}
