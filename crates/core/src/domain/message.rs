// Bridge IPC Message Model
//
// One JSON object per stdout line:
//   {"type":"heartbeat","ts":<f64>}
//   {"type":"metrics","gpus":[...],"count":<int>,"ts":<f64>}
//   {"type":"error","msg":<string>,"ts":<f64>}

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Decoded bridge message
///
/// Unknown `type` values decode to `Unknown` so the reader can log and skip them.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeMessage {
    Heartbeat {
        #[serde(default)]
        ts: Option<f64>,
    },
    Metrics {
        #[serde(default)]
        gpus: Vec<serde_json::Value>,
        #[serde(default)]
        count: Option<usize>,
        #[serde(default)]
        ts: Option<f64>,
    },
    Error {
        msg: String,
        #[serde(default)]
        ts: Option<f64>,
    },
    #[serde(other)]
    Unknown,
}

/// Protocol-level decoding failure (dropped and logged, never escalated)
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,

    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("line is not a JSON object")]
    NotAnObject,

    #[error("missing or non-string 'type' field")]
    MissingType,

    #[error("invalid '{kind}' message: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode exactly one stdout line into a message
pub fn decode_line(line: &str) -> Result<BridgeMessage, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(ProtocolError::InvalidJson)?;

    let kind = match value.as_object() {
        None => return Err(ProtocolError::NotAnObject),
        Some(obj) => match obj.get("type").and_then(|t| t.as_str()) {
            Some(kind) => kind.to_string(),
            None => return Err(ProtocolError::MissingType),
        },
    };

    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidFields { kind, source })
}

/// Latest metrics payload cached by the supervisor (overwritten, never appended)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub gpus: Vec<serde_json::Value>,
    pub count: usize,
    pub ts: Option<f64>,
    pub received_at: i64, // epoch ms
}

impl MetricsSnapshot {
    pub fn new(
        gpus: Vec<serde_json::Value>,
        count: Option<usize>,
        ts: Option<f64>,
        received_at: i64,
    ) -> Self {
        let count = count.unwrap_or(gpus.len());
        Self {
            gpus,
            count,
            ts,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_heartbeat() {
        let msg = decode_line(r#"{"type":"heartbeat","ts":1700000000.5}"#).unwrap();
        assert_eq!(
            msg,
            BridgeMessage::Heartbeat {
                ts: Some(1700000000.5)
            }
        );
    }

    #[test]
    fn test_decode_metrics_payload() {
        let line = r#"{"type":"metrics","gpus":[{"name":"gpu0","util":42}],"count":1,"ts":1.0}"#;
        match decode_line(line).unwrap() {
            BridgeMessage::Metrics { gpus, count, ts } => {
                assert_eq!(gpus.len(), 1);
                assert_eq!(gpus[0]["util"], 42);
                assert_eq!(count, Some(1));
                assert_eq!(ts, Some(1.0));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_line() {
        let msg = decode_line("{\"type\":\"error\",\"msg\":\"NVML init failed\",\"ts\":2.0}\r\n")
            .unwrap();
        assert!(matches!(msg, BridgeMessage::Error { ref msg, .. } if msg == "NVML init failed"));
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let msg = decode_line(r#"{"type":"hello","ts":1.0}"#).unwrap();
        assert_eq!(msg, BridgeMessage::Unknown);
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        assert!(matches!(decode_line(""), Err(ProtocolError::Empty)));
        assert!(matches!(
            decode_line("{not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_line("[1,2,3]"),
            Err(ProtocolError::NotAnObject)
        ));
        assert!(matches!(
            decode_line(r#"{"ts":1.0}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            decode_line(r#"{"type":"error","ts":1.0}"#),
            Err(ProtocolError::InvalidFields { .. })
        ));
    }

    #[test]
    fn test_snapshot_count_defaults_to_gpu_len() {
        let gpus = vec![serde_json::json!({}), serde_json::json!({})];
        let snapshot = MetricsSnapshot::new(gpus, None, None, 10);
        assert_eq!(snapshot.count, 2);
    }
}
