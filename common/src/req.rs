// keep in sync with the remote aggregation API
use serde_json::Value;

/// Body posted to `<remote>/record` for every reading.
///
/// The remote API expects the misspelled `humedity` key and stores
/// `value2` as temperature and `value1` as humidity.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecordPayload {
    pub temperature: Value,
    #[serde(rename = "humedity")]
    pub humidity: Value,
    pub gas_level: String,
    pub light: bool,
}

impl RecordPayload {
    pub fn new(value1: Value, value2: Value) -> Self {
        Self {
            temperature: value2,
            humidity: value1,
            gas_level: "a".to_string(),
            light: false,
        }
    }
}

/// Body posted to `<remote>/table` for every seat assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TablePayload {
    pub seat1: i32,
    pub seat2: i32,
    pub seat3: i32,
    pub seat4: i32,
}

// ===============================================
// ingress responses
// ===============================================

#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Ack {
    pub status: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub unsynced: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PendingStatus {
    pub readings: QueueStatus,
    pub seats: QueueStatus,
}
