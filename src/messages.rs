// Wire messages for the motor and display command topics.
//
// MotorCommand is the canonical six-field JSON object the robot firmware
// consumes. Telemetry payloads are decoded permissively as opaque JSON;
// the firmware side of that contract is not ours to enforce.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Malformed payload. Never fatal; callers log or discard.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Velocity command for the differential base.
///
/// The receiver must stop on its own if no command arrives within
/// `deadman_ms` of the previous one; redundant publishing on this side is
/// a mitigation, not a replacement, for that watchdog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorCommand {
    pub v_l: f64,
    pub v_r: f64,
    pub unit: String,
    pub deadman_ms: u32,
    pub seq: u64,
    pub ts_ms: u64,
}

impl MotorCommand {
    pub fn new(v_l: f64, v_r: f64, unit: &str, deadman_ms: u32, seq: u64) -> Self {
        Self {
            v_l,
            v_r,
            unit: unit.to_string(),
            deadman_ms,
            seq,
            ts_ms: now_ms(),
        }
    }

    /// Explicit zero-velocity command.
    pub fn stop(unit: &str, deadman_ms: u32, seq: u64) -> Self {
        Self::new(0.0, 0.0, unit, deadman_ms, seq)
    }

    pub fn is_stop(&self) -> bool {
        self.v_l == 0.0 && self.v_r == 0.0
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Strict decode of the six-field schema.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Text for the robot's status display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OledCommand {
    pub text: String,
    pub ts_ms: u64,
}

impl OledCommand {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ts_ms: now_ms(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Permissive decode for opaque telemetry payloads (no schema enforced).
pub fn decode_value(bytes: &[u8]) -> Result<Value, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Wall-clock epoch milliseconds used to stamp outgoing commands.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_command_round_trip() {
        let cmd = MotorCommand {
            v_l: 0.125,
            v_r: -0.5,
            unit: "mps".to_string(),
            deadman_ms: 300,
            seq: 42,
            ts_ms: 1_700_000_000_123,
        };
        let bytes = cmd.encode().unwrap();
        let back = MotorCommand::decode(&bytes).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_encoded_fields_are_native_numbers() {
        let cmd = MotorCommand::new(0.1, 0.0, "mps", 300, 7);
        let value: Value = serde_json::from_slice(&cmd.encode().unwrap()).unwrap();
        assert!(value["v_l"].is_number());
        assert!(value["deadman_ms"].is_u64());
        assert!(value["seq"].is_u64());
        assert!(value["ts_ms"].is_u64());
        assert!(value["unit"].is_string());
    }

    #[test]
    fn test_strict_decode_rejects_missing_fields() {
        let err = MotorCommand::decode(br#"{"v_l": 0.1, "v_r": 0.2}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_decode_garbage_is_error_not_panic() {
        assert!(MotorCommand::decode(b"\xff\xfe not json").is_err());
        assert!(decode_value(b"{truncated").is_err());
    }

    #[test]
    fn test_permissive_decode_accepts_any_shape() {
        let value = decode_value(br#"{"imu": {"gyro": [1, 2, 3]}, "extra": null}"#).unwrap();
        assert!(value["imu"]["gyro"].is_array());
    }

    #[test]
    fn test_stop_has_zero_velocities() {
        let cmd = MotorCommand::stop("mps", 300, 0);
        assert!(cmd.is_stop());
        assert_eq!(cmd.v_l, 0.0);
        assert_eq!(cmd.v_r, 0.0);
    }
}
