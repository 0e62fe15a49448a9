//! Operational state, per-stand analog configuration, and the two error
//! taxonomies (command exit codes and subsystem fault codes).
//!
//! Status values are represented as a tagged enum internally; the fixed-width
//! display strings ("SHUTDWN", "NORMAL", ...) exist only at the protocol
//! boundary via [`OperationalStatus::display_code`].

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub const MAX_MESSAGE_LEN: usize = 256;

/// Bounded buffer for the INFO and LASTLOG monitor points.
pub type MessageBuffer = ArrayString<MAX_MESSAGE_LEN>;

/// Clip a message to the protocol limit, respecting UTF-8 boundaries.
pub fn clipped(msg: &str) -> MessageBuffer {
    let mut buf = MessageBuffer::new();
    for ch in msg.chars() {
        if buf.try_push(ch).is_err() {
            break;
        }
    }
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OperationalStatus {
    #[default]
    Shutdown,
    Booting,
    Normal,
    Warning,
    Error,
}

impl OperationalStatus {
    /// Seven-character-or-less status string used on the wire.
    pub fn display_code(self) -> &'static str {
        match self {
            OperationalStatus::Shutdown => "SHUTDWN",
            OperationalStatus::Booting => "BOOTING",
            OperationalStatus::Normal => "NORMAL",
            OperationalStatus::Warning => "WARNING",
            OperationalStatus::Error => "ERROR",
        }
    }
}

/// Polarization channel on a stand's FEE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pol {
    Pol1,
    Pol2,
}

impl Pol {
    pub fn index(self) -> usize {
        match self {
            Pol::Pol1 => 0,
            Pol::Pol2 => 1,
        }
    }

    pub fn from_digit(digit: u16) -> Option<Self> {
        match digit {
            1 => Some(Pol::Pol1),
            2 => Some(Pol::Pol2),
            _ => None,
        }
    }
}

/// Analog configuration for one stand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandConfig {
    pub power_pol1: bool,
    pub power_pol2: bool,
    /// Filter selection, 0..=5.
    pub filter: u8,
    /// First attenuator, 0..=15.
    pub at1: u8,
    /// Second attenuator, 0..=15.
    pub at2: u8,
    /// Split attenuator, 0..=15.
    pub ats: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TempStatus {
    #[default]
    Unknown,
    InRange,
    /// Above the warning threshold but below the critical cutoff.
    Warning,
    OverTemp,
    UnderTemp,
}

impl TempStatus {
    pub fn display_code(self) -> &'static str {
        match self {
            TempStatus::Unknown => "UNKNOWN",
            TempStatus::InRange => "IN_RANGE",
            TempStatus::Warning => "WARNING",
            TempStatus::OverTemp => "OVER_TEMP",
            TempStatus::UnderTemp => "UNDER_TEMP",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SensorReading {
    pub name: String,
    pub celsius: f64,
}

/// Cached telemetry for one of the chassis power supplies, refreshed by the
/// chassis monitor and by the RXP/FEP command paths.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SupplyTelemetry {
    pub on: bool,
    pub unit_count: u8,
    pub unit_status: Vec<String>,
    pub voltage_v: f64,
    pub current_a: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyKind {
    Arx,
    Fee,
}

impl SupplyKind {
    pub fn name(self) -> &'static str {
        match self {
            SupplyKind::Arx => "ARX",
            SupplyKind::Fee => "FEE",
        }
    }
}

/// Complete controller-owned subsystem state.
#[derive(Debug, Clone)]
pub struct SubsystemState {
    pub status: OperationalStatus,
    pub info: MessageBuffer,
    pub last_log: MessageBuffer,
    pub ready: bool,
    /// Set by a completed INI, cleared by SHT. `ready` holds only while this
    /// is set and the status is NORMAL.
    pub initialized: bool,
    /// The fault that drove the current ERROR status, if any. ERROR is sticky
    /// until this condition resolves or a fresh INI/SHT cycle runs.
    pub error_fault: Option<Fault>,
    pub stands: Vec<StandConfig>,
    pub boards_found: u8,
    pub arx_supply: SupplyTelemetry,
    pub fee_supply: SupplyTelemetry,
    pub temp_status: TempStatus,
    pub sensors: Vec<SensorReading>,
    /// Per-stand FEE current readings, one pair (pol 1, pol 2) per stand.
    pub fee_currents: Vec<[f64; 2]>,
    /// Per-stand RF power readings.
    pub rf_powers: Vec<f64>,
}

impl SubsystemState {
    pub fn new(stand_count: u16) -> Self {
        let n = stand_count as usize;
        Self {
            status: OperationalStatus::Shutdown,
            info: clipped("System shut down"),
            last_log: MessageBuffer::new(),
            ready: false,
            initialized: false,
            error_fault: None,
            stands: vec![StandConfig::default(); n],
            boards_found: 0,
            arx_supply: SupplyTelemetry::default(),
            fee_supply: SupplyTelemetry::default(),
            temp_status: TempStatus::Unknown,
            sensors: Vec::new(),
            fee_currents: vec![[0.0; 2]; n],
            rf_powers: vec![0.0; n],
        }
    }

    /// Transition the operational status, keeping the `ready` invariant:
    /// ready holds only while initialized and NORMAL.
    pub fn set_status(&mut self, status: OperationalStatus) {
        self.status = status;
        self.ready = self.initialized && status == OperationalStatus::Normal;
    }

    pub fn set_info(&mut self, msg: &str) {
        self.info = clipped(msg);
    }

    pub fn set_last_log(&mut self, msg: &str) {
        self.last_log = clipped(msg);
    }

    /// Record a subsystem fault: forces ERROR, drops `ready`, and writes the
    /// structured info string consumed verbatim by status queries.
    pub fn record_fault(&mut self, fault: Fault) {
        self.error_fault = Some(fault);
        self.info = clipped(&fault.info_string());
        self.set_status(OperationalStatus::Error);
    }

    pub fn supply(&self, kind: SupplyKind) -> &SupplyTelemetry {
        match kind {
            SupplyKind::Arx => &self.arx_supply,
            SupplyKind::Fee => &self.fee_supply,
        }
    }

    pub fn supply_mut(&mut self, kind: SupplyKind) -> &mut SupplyTelemetry {
        match kind {
            SupplyKind::Arx => &mut self.arx_supply,
            SupplyKind::Fee => &mut self.fee_supply,
        }
    }
}

/// Exit codes returned to the protocol caller when a command is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    BadBoardCount,
    BadStand,
    BadFilter,
    BadAttenuator,
    BadPowerSetting,
    BadArguments,
    Blocking,
    NotReady,
    NotImplemented,
}

impl ExitCode {
    pub fn code(self) -> u8 {
        match self {
            ExitCode::BadBoardCount => 0x01,
            ExitCode::BadStand => 0x02,
            ExitCode::BadFilter => 0x03,
            ExitCode::BadAttenuator => 0x04,
            ExitCode::BadPowerSetting => 0x05,
            ExitCode::BadArguments => 0x06,
            ExitCode::Blocking => 0x07,
            ExitCode::NotReady => 0x08,
            ExitCode::NotImplemented => 0x09,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ExitCode::BadBoardCount => "invalid board count",
            ExitCode::BadStand => "invalid stand",
            ExitCode::BadFilter => "invalid filter code",
            ExitCode::BadAttenuator => "invalid attenuator setting",
            ExitCode::BadPowerSetting => "invalid power setting",
            ExitCode::BadArguments => "malformed arguments",
            ExitCode::Blocking => "blocking operation in progress",
            ExitCode::NotReady => "subsystem not initialized",
            ExitCode::NotImplemented => "command not implemented",
        }
    }
}

/// Subsystem fault conditions recorded into the INFO monitor point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    OverTemperature,
    UnderTemperature,
    OverVoltage,
    UnderVoltage,
    OverCurrent,
    ModuleFault,
    BusFailure,
    BoardMismatch,
    ConfigurationLost,
}

impl Fault {
    pub fn domain(self) -> &'static str {
        match self {
            Fault::OverTemperature | Fault::UnderTemperature => "TEMPERATURE",
            Fault::OverVoltage | Fault::UnderVoltage | Fault::OverCurrent | Fault::ModuleFault => {
                "SUPPLY"
            }
            Fault::BusFailure | Fault::BoardMismatch | Fault::ConfigurationLost => "CHASSIS",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Fault::OverTemperature => 0x01,
            Fault::UnderTemperature => 0x02,
            Fault::OverVoltage => 0x03,
            Fault::UnderVoltage => 0x04,
            Fault::OverCurrent => 0x05,
            Fault::ModuleFault => 0x06,
            Fault::BusFailure => 0x07,
            Fault::BoardMismatch => 0x08,
            Fault::ConfigurationLost => 0x09,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Fault::OverTemperature => "over-temperature condition",
            Fault::UnderTemperature => "under-temperature condition",
            Fault::OverVoltage => "supply over-voltage",
            Fault::UnderVoltage => "supply under-voltage",
            Fault::OverCurrent => "supply over-current",
            Fault::ModuleFault => "power module fault",
            Fault::BusFailure => "chassis bus failure",
            Fault::BoardMismatch => "board count mismatch",
            Fault::ConfigurationLost => "chassis configuration lost",
        }
    }

    pub fn is_temperature(self) -> bool {
        matches!(self, Fault::OverTemperature | Fault::UnderTemperature)
    }

    /// `"<DOMAIN>! 0x<code> <description>"`, consumed verbatim by RPT INFO.
    pub fn info_string(self) -> String {
        format!("{}! 0x{:02X} {}", self.domain(), self.code(), self.description())
    }
}

/// Command-class identifier used for single-flight exclusivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    Ini,
    Sht,
    Fil,
    At1,
    At2,
    Ats,
    Fpw,
    Rxp,
    Fep,
}

impl CommandTag {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandTag::Ini => "INI",
            CommandTag::Sht => "SHT",
            CommandTag::Fil => "FIL",
            CommandTag::At1 => "AT1",
            CommandTag::At2 => "AT2",
            CommandTag::Ats => "ATS",
            CommandTag::Fpw => "FPW",
            CommandTag::Rxp => "RXP",
            CommandTag::Fep => "FEP",
        }
    }

    /// Tags that must not be active for this tag to be acquired. INI and SHT
    /// exclude each other as well as themselves.
    fn conflicts(self) -> &'static [CommandTag] {
        match self {
            CommandTag::Ini | CommandTag::Sht => &[CommandTag::Ini, CommandTag::Sht],
            CommandTag::Fil => &[CommandTag::Fil],
            CommandTag::At1 => &[CommandTag::At1],
            CommandTag::At2 => &[CommandTag::At2],
            CommandTag::Ats => &[CommandTag::Ats],
            CommandTag::Fpw => &[CommandTag::Fpw],
            CommandTag::Rxp => &[CommandTag::Rxp],
            CommandTag::Fep => &[CommandTag::Fep],
        }
    }
}

/// Set of active command tags with atomic check-and-insert semantics.
///
/// Acquisition is test-and-set under a single lock: two simultaneous requests
/// for the same tag cannot both pass the guard. The returned [`TagGuard`]
/// releases the tag on drop, so a background task holding one releases it on
/// completion whether it succeeded, failed, or panicked.
#[derive(Debug, Clone, Default)]
pub struct TagSet {
    inner: Arc<Mutex<HashSet<CommandTag>>>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, tag: CommandTag) -> Option<TagGuard> {
        let mut set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if tag.conflicts().iter().any(|t| set.contains(t)) {
            return None;
        }
        set.insert(tag);
        Some(TagGuard {
            tag,
            set: Arc::clone(&self.inner),
        })
    }

    pub fn is_active(&self, tag: CommandTag) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&tag)
    }
}

#[derive(Debug)]
pub struct TagGuard {
    tag: CommandTag,
    set: Arc<Mutex<HashSet<CommandTag>>>,
}

impl Drop for TagGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.tag);
    }
}
