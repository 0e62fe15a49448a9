//! Bus driver interface: the contract the controller expects from the
//! SPI/RS485/I2C collaborators that actually touch the chassis.
//!
//! Drivers receive a [`DeviceRegistry`] so that access to each numbered board
//! is serialized through an explicit per-device guard rather than any
//! process-wide lock table. The [`SimulatedBus`] implementation records every
//! command it is given and serves canned sensor values; it backs the `aspd`
//! binary and the test suite.

use crate::state::{Pol, SupplyKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const MAX_SENSOR_VALUES: usize = 64;

/// Bounded sensor-value list returned by a poll.
pub type SensorValues = heapless::Vec<f64, MAX_SENSOR_VALUES>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceId {
    Board(u8),
    Broadcast,
}

/// Power setting for a supply or FEE channel. The wire encodes these as the
/// two-digit codes 00 and 11.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSetting {
    Off,
    On,
}

impl PowerSetting {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(PowerSetting::Off),
            11 => Some(PowerSetting::On),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            PowerSetting::Off => 0,
            PowerSetting::On => 11,
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, PowerSetting::On)
    }
}

/// Coded command sent to a chassis board. How a driver turns one of these
/// into bus bits is its own business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChassisCommand {
    SetFilter { channel: u8, code: u8 },
    SetAt1 { channel: u8, setting: u8 },
    SetAt2 { channel: u8, setting: u8 },
    SetAtSplit { channel: u8, setting: u8 },
    SetFeePower { channel: u8, pol: Pol, setting: PowerSetting },
    InitializeBoard,
    ShutdownBoard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    BoardPresence,
    ArxSupply,
    FeeSupply,
    FeeCurrent,
    RfPower,
}

impl SupplyKind {
    pub fn sensor(self) -> SensorKind {
        match self {
            SupplyKind::Arx => SensorKind::ArxSupply,
            SupplyKind::Fee => SensorKind::FeeSupply,
        }
    }
}

/// Capability set implemented by the physical bus collaborators.
#[async_trait]
pub trait BusDriver: Send + Sync {
    /// Send a coded command to a numbered device (or all devices). A single
    /// boolean reports success; retry policy lives in [`send_with_retry`].
    async fn send_device_command(&self, device: DeviceId, command: ChassisCommand) -> bool;

    /// Poll a named sensor group. `None` means the bus bridge itself did not
    /// answer.
    async fn poll_sensors(&self, kind: SensorKind) -> Option<SensorValues>;

    /// Switch a chassis power supply at the given address.
    async fn set_power_state(&self, address: u8, setting: PowerSetting) -> bool;
}

/// Retry a device command a fixed number of times with a fixed delay between
/// attempts. The caller sees a single boolean.
pub async fn send_with_retry(
    bus: &dyn BusDriver,
    device: DeviceId,
    command: ChassisCommand,
    attempts: u32,
    delay: Duration,
) -> bool {
    let attempts = attempts.max(1);
    for n in 0..attempts {
        if bus.send_device_command(device, command).await {
            return true;
        }
        debug!(?device, ?command, attempt = n + 1, "device command failed");
        if n + 1 < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    false
}

/// Registry owning one guard per numbered board. Injected into bus drivers so
/// that concurrent tasks touching the same board serialize on that board
/// alone, not on a global lock.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    guards: HashMap<u8, Arc<tokio::sync::Mutex<()>>>,
}

impl DeviceRegistry {
    pub fn new(boards: impl IntoIterator<Item = u8>) -> Self {
        Self {
            guards: boards
                .into_iter()
                .map(|b| (b, Arc::new(tokio::sync::Mutex::new(()))))
                .collect(),
        }
    }

    pub fn guard(&self, board: u8) -> Option<Arc<tokio::sync::Mutex<()>>> {
        self.guards.get(&board).cloned()
    }

    pub fn contains(&self, board: u8) -> bool {
        self.guards.contains_key(&board)
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

#[derive(Debug, Default)]
struct SimInner {
    sent: Vec<(DeviceId, ChassisCommand)>,
    sensors: HashMap<SensorKind, Vec<f64>>,
    power: HashMap<u8, PowerSetting>,
    fail_commands: bool,
    fail_power: bool,
    offline: bool,
}

/// In-memory bus driver for the simulator binary and the test suite.
///
/// Records every device command, serves settable sensor values, and can be
/// switched into various failure modes.
#[derive(Debug)]
pub struct SimulatedBus {
    registry: DeviceRegistry,
    latency: Duration,
    inner: std::sync::Mutex<SimInner>,
}

impl SimulatedBus {
    pub fn new(board_count: u8) -> Self {
        let mut sensors = HashMap::new();
        sensors.insert(SensorKind::BoardPresence, vec![1.0; board_count as usize]);
        sensors.insert(SensorKind::Temperature, vec![26.5, 27.0]);
        sensors.insert(SensorKind::ArxSupply, vec![15.0, 2.5, 0.0]);
        sensors.insert(SensorKind::FeeSupply, vec![15.0, 1.5, 0.0]);
        Self {
            registry: DeviceRegistry::new(1..=board_count),
            latency: Duration::ZERO,
            inner: std::sync::Mutex::new(SimInner {
                sensors,
                ..SimInner::default()
            }),
        }
    }

    /// Add a fixed per-call latency, useful for exercising overlap between
    /// concurrently running command tasks.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_sensor_values(&self, kind: SensorKind, values: &[f64]) {
        self.lock().sensors.insert(kind, values.to_vec());
    }

    pub fn set_command_failure(&self, fail: bool) {
        self.lock().fail_commands = fail;
    }

    pub fn set_power_failure(&self, fail: bool) {
        self.lock().fail_power = fail;
    }

    /// When offline, sensor polls return `None`, as a missing bus bridge
    /// would.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn sent_commands(&self) -> Vec<(DeviceId, ChassisCommand)> {
        self.lock().sent.clone()
    }

    pub fn clear_sent_commands(&self) {
        self.lock().sent.clear();
    }

    pub fn power_state(&self, address: u8) -> Option<PowerSetting> {
        self.lock().power.get(&address).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BusDriver for SimulatedBus {
    async fn send_device_command(&self, device: DeviceId, command: ChassisCommand) -> bool {
        if self.latency > Duration::ZERO {
            tokio::time::sleep(self.latency).await;
        }
        if let DeviceId::Board(board) = device {
            let Some(guard) = self.registry.guard(board) else {
                return false;
            };
            let _held = guard.lock().await;
            let mut inner = self.lock();
            if inner.fail_commands {
                return false;
            }
            inner.sent.push((device, command));
        } else {
            let mut inner = self.lock();
            if inner.fail_commands {
                return false;
            }
            inner.sent.push((device, command));
        }
        true
    }

    async fn poll_sensors(&self, kind: SensorKind) -> Option<SensorValues> {
        if self.latency > Duration::ZERO {
            tokio::time::sleep(self.latency).await;
        }
        let inner = self.lock();
        if inner.offline {
            return None;
        }
        let values = inner.sensors.get(&kind)?;
        let mut out = SensorValues::new();
        for v in values.iter().take(MAX_SENSOR_VALUES) {
            let _ = out.push(*v);
        }
        Some(out)
    }

    async fn set_power_state(&self, address: u8, setting: PowerSetting) -> bool {
        if self.latency > Duration::ZERO {
            tokio::time::sleep(self.latency).await;
        }
        let mut inner = self.lock();
        if inner.fail_power {
            return false;
        }
        inner.power.insert(address, setting);
        true
    }
}
