use crate::model::StatusSnapshot;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Sensor units publish status snapshots on `tele/<device_id>/status`.
pub(crate) const STATUS_TOPIC_FILTER: &str = "tele/+/status";

/// The hub publishes pump commands here; the sensor unit actuates the relay.
pub(crate) const PUMP_COMMAND_TOPIC: &str = "bomba/set";

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract device_id from "tele/<device_id>/status".
pub(crate) fn extract_device_id(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "status" {
        Some(parts[1])
    } else {
        None
    }
}

/// Parse a status snapshot payload (JSON).
pub(crate) fn parse_status_payload(payload: &[u8]) -> Result<StatusSnapshot, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Payload for a pump command.
pub(crate) fn pump_command(on: bool) -> Vec<u8> {
    if on { b"ON".to_vec() } else { b"OFF".to_vec() }
}

// ===========================================================================
// Tests
// ===========================================================================
