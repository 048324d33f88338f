use crate::rpc::RpcValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Firmware version reported in the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub bugfix: u32,
    #[serde(default)]
    pub build: u32,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.bugfix, self.build)
    }
}

/// Result payload of the `handshake` call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeInfo {
    #[serde(default)]
    pub machine_type: String,
    #[serde(default)]
    pub machine_name: String,
    #[serde(default)]
    pub bot_type: String,
    #[serde(default, rename = "iserial")]
    pub serial: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub ssl_port: String,
    #[serde(default)]
    pub vid: i64,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub motor_driver_version: String,
    #[serde(default)]
    pub firmware_version: FirmwareVersion,
}

/// One extruder as reported by `get_system_information`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toolhead {
    pub index: usize,
    pub present: bool,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    /// Printer error code, 0 when healthy
    pub error: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInformation {
    pub toolheads: Vec<Toolhead>,
}

impl SystemInformation {
    /// Toolheads are listed either directly under `toolheads` or under
    /// `toolheads.extruder`, depending on firmware.
    pub fn from_rpc(value: &RpcValue) -> Self {
        let entries = value
            .get("toolheads")
            .and_then(|t| t.as_array().or_else(|| t.get("extruder").and_then(RpcValue::as_array)))
            .unwrap_or_default();

        let toolheads = entries
            .iter()
            .enumerate()
            .map(|(index, head)| Toolhead {
                index,
                present: head
                    .get("tool_present")
                    .and_then(RpcValue::as_bool)
                    .unwrap_or(false),
                current_temperature: head.get("current_temperature").and_then(RpcValue::as_f64),
                target_temperature: head.get("target_temperature").and_then(RpcValue::as_f64),
                error: head.get("error").and_then(RpcValue::as_i64).unwrap_or(0),
            })
            .collect();

        Self { toolheads }
    }
}

/// Point-in-time state of one LAN printer, rebuilt every poll cycle.
#[derive(Debug, Clone, Serialize)]
pub struct LanPrinter {
    /// `host:port` key in the credential store
    pub address: String,
    pub machine_name: String,
    pub machine_type: String,
    pub bot_type: String,
    pub serial: String,
    pub api_version: String,
    pub firmware_version: FirmwareVersion,
    /// `None` while the printer is unpaired or rejected our token
    pub token: Option<String>,
    pub last_pinged_at: DateTime<Utc>,
    pub system_information: Option<SystemInformation>,
    pub queue_status: Option<RpcValue>,
    pub print_history: Option<RpcValue>,
    pub statistics: Option<RpcValue>,
}

impl LanPrinter {
    pub fn from_handshake(address: &str, info: HandshakeInfo, token: Option<String>) -> Self {
        Self {
            address: address.to_string(),
            machine_name: info.machine_name,
            machine_type: info.machine_type,
            bot_type: info.bot_type,
            serial: info.serial,
            api_version: info.api_version,
            firmware_version: info.firmware_version,
            token,
            last_pinged_at: Utc::now(),
            system_information: None,
            queue_status: None,
            print_history: None,
            statistics: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}
