// Module: Access
// The capability facade every exec uses to touch a device. Execs never
// talk to a DUT, servo host or RPM outlet directly; production and test
// implementations of this trait coexist behind the same contract.

pub mod shell;
pub mod stub;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ErrorCode;

/// Interval between OFF and ON when cycling a power outlet.
pub const POWER_CYCLE_INTERVAL: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

/// Failures surfaced by the Access facade.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("ping to '{resource}' failed after {attempts} attempt(s)")]
    Ping { resource: String, attempts: u32 },

    #[error("command on '{resource}' failed: {reason}")]
    Command { resource: String, reason: String },

    #[error("servod call '{method}' on '{resource}' failed: {reason}")]
    Servod {
        resource: String,
        method: String,
        reason: String,
    },

    #[error("copy ({direction}) on '{resource}' failed: {reason}")]
    Copy {
        resource: String,
        direction: &'static str,
        reason: String,
    },

    #[error("power control on '{resource}' failed: {reason}")]
    Power { resource: String, reason: String },

    #[error("inventory access for '{resource}' failed: {reason}")]
    Inventory { resource: String, reason: String },
}

impl AccessError {
    /// Structured code (E2xxx catalogue).
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Ping { .. } => ErrorCode::PING_FAILED,
            Self::Command { .. } => ErrorCode::COMMAND_FAILED,
            Self::Servod { .. } => ErrorCode::SERVOD_FAULT,
            Self::Copy { .. } => ErrorCode::COPY_FAILED,
            Self::Power { .. } => ErrorCode::POWER_FAILED,
            Self::Inventory { .. } => ErrorCode::INVENTORY_FAILED,
        }
    }
}

// ----------------------------------------------------------------------------
// Value types
// ----------------------------------------------------------------------------

/// Result of running an OS command on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Discriminated scalar returned by a servod call.
#[derive(Debug, Clone, PartialEq)]
pub enum ServodValue {
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
}

impl ServodValue {
    /// String form, for logging and loose comparisons.
    pub fn as_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Double(d) => d.to_string(),
        }
    }
}

/// Response of a servod call. `fault` means the daemon reported an
/// error for the call even though the transport round-trip worked.
#[derive(Debug, Clone, PartialEq)]
pub struct ServodResponse {
    pub value: ServodValue,
    pub fault: bool,
}

/// Power outlet operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
    /// OFF, wait [`POWER_CYCLE_INTERVAL`], ON.
    Cycle,
}

impl std::fmt::Display for PowerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Cycle => "CYCLE",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a power operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerStatus {
    pub ok: bool,
    pub reason: Option<String>,
}

impl PowerStatus {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }
}

/// Inventory record of a device under test and its peripherals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dut {
    pub name: String,
    #[serde(default)]
    pub board: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm_outlet: Option<String>,
    /// Free-form scheduler state ("ready", "needs_repair", ...).
    #[serde(default)]
    pub state: String,
}

// ----------------------------------------------------------------------------
// The facade
// ----------------------------------------------------------------------------

/// Uniform capability set for touching a lab device.
///
/// Every method takes the resource name so one Access instance can
/// serve a whole unit (DUT plus peripherals).
#[async_trait]
pub trait Access: Send + Sync {
    /// Reachability probe with a bounded number of attempts.
    async fn ping(&self, resource: &str, attempts: u32) -> Result<(), AccessError>;

    /// Executes an OS command on the resource under a timeout.
    async fn run(
        &self,
        resource: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, AccessError>;

    /// Typed RPC against the servod daemon adjacent to the resource.
    async fn call_servod(
        &self,
        resource: &str,
        method: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ServodResponse, AccessError>;

    /// Copies a file or directory onto the resource.
    async fn copy_to(
        &self,
        resource: &str,
        src: &str,
        dst: &str,
        recursive: bool,
    ) -> Result<(), AccessError>;

    /// Copies a file or directory from the resource.
    async fn copy_from(
        &self,
        resource: &str,
        src: &str,
        dst: &str,
        recursive: bool,
    ) -> Result<(), AccessError>;

    /// Drives the RPM outlet feeding the resource.
    async fn set_power_supply(
        &self,
        resource: &str,
        action: PowerAction,
    ) -> Result<PowerStatus, AccessError>;

    /// Resources scheduled under the given unit.
    async fn list_resources_for_unit(&self, unit: &str) -> Result<Vec<String>, AccessError>;

    /// Reads the inventory record for a resource.
    async fn get_dut(&self, resource: &str) -> Result<Dut, AccessError>;

    /// Writes an updated inventory record.
    async fn update_dut(&self, dut: &Dut) -> Result<(), AccessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_error_codes() {
        let err = AccessError::Ping {
            resource: "dut-1".to_string(),
            attempts: 3,
        };
        assert_eq!(err.code(), ErrorCode::PING_FAILED);

        let err = AccessError::Servod {
            resource: "dut-1".to_string(),
            method: "lid_open".to_string(),
            reason: "fault".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::SERVOD_FAULT);
    }

    #[test]
    fn test_servod_value_as_text() {
        assert_eq!(ServodValue::String("ok".into()).as_text(), "ok");
        assert_eq!(ServodValue::Bool(true).as_text(), "true");
        assert_eq!(ServodValue::Int(42).as_text(), "42");
        assert_eq!(ServodValue::Double(0.5).as_text(), "0.5");
    }

    #[test]
    fn test_command_result_success() {
        let ok = CommandResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(ok.success());
        let bad = CommandResult {
            exit_code: 2,
            stdout: String::new(),
            stderr: "boom".to_string(),
        };
        assert!(!bad.success());
    }

    #[test]
    fn test_dut_serde_round_trip() {
        let dut = Dut {
            name: "dut-1".to_string(),
            board: "volteer".to_string(),
            model: "delbin".to_string(),
            serial: "SER123".to_string(),
            servo_host: Some("dut-1-servo".to_string()),
            servo_port: Some(9999),
            rpm_outlet: Some("outlet-7".to_string()),
            state: "needs_repair".to_string(),
        };
        let text = serde_json::to_string(&dut).unwrap();
        let back: Dut = serde_json::from_str(&text).unwrap();
        assert_eq!(back, dut);
    }
}
