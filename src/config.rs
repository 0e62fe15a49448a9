//! Runtime configuration for the controller and the `aspd` binary.
//!
//! Everything has a sensible default so the simulator runs without a config
//! file; a JSON file can override any subset of fields.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Three-letter subsystem identifier used for destination filtering.
    pub subsystem: String,
    pub serial_number: String,
    pub bind_address: String,

    /// Number of antenna stands the chassis serves.
    pub stand_count: usize,
    /// Boards an INI without an explicit count expects to find.
    pub boards_expected: u8,
    pub max_boards: u8,
    pub stands_per_board: usize,

    pub arx_supply_address: u8,
    pub fee_supply_address: u8,

    /// Attempts per device command before the operation is declared failed.
    pub device_retry_count: u32,
    pub device_retry_delay_ms: u64,

    /// Attempts per outbound response frame before it is dropped.
    pub send_retry_limit: u32,
    pub send_retry_backoff_ms: u64,

    /// Pause before board shutdown on a non-SCRAM SHT.
    pub settle_delay_ms: u64,

    pub temperature_period_ms: u64,
    pub chassis_period_ms: u64,

    pub temp_warning_c: f64,
    pub temp_critical_c: f64,
    pub temp_minimum_c: f64,

    /// Display names for the temperature sensors, in poll order.
    pub sensor_names: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subsystem: "ASP".to_string(),
            serial_number: "ASP01".to_string(),
            bind_address: "0.0.0.0:1742".to_string(),
            stand_count: 260,
            boards_expected: 33,
            max_boards: 33,
            stands_per_board: 8,
            arx_supply_address: 0x1f,
            fee_supply_address: 0x2f,
            device_retry_count: 3,
            device_retry_delay_ms: 50,
            send_retry_limit: 5,
            send_retry_backoff_ms: 50,
            settle_delay_ms: 5_000,
            temperature_period_ms: 30_000,
            chassis_period_ms: 60_000,
            temp_warning_c: 45.0,
            temp_critical_c: 60.0,
            temp_minimum_c: -10.0,
            sensor_names: vec!["INTAKE".to_string(), "EXHAUST".to_string()],
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Display name for temperature sensor `index`, falling back to a
    /// generated name when the config names fewer sensors than the chassis
    /// reports.
    pub fn sensor_name(&self, index: usize) -> String {
        self.sensor_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("SENSOR{}", index + 1))
    }

    pub fn device_retry_delay(&self) -> Duration {
        Duration::from_millis(self.device_retry_delay_ms)
    }

    pub fn send_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.send_retry_backoff_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn temperature_period(&self) -> Duration {
        Duration::from_millis(self.temperature_period_ms)
    }

    pub fn chassis_period(&self) -> Duration {
        Duration::from_millis(self.chassis_period_ms)
    }
}
