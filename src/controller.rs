//! Command execution and subsystem state ownership.
//!
//! [`AspController::process_command`] is the synchronous entry point the
//! dispatcher calls for every decoded frame: it validates the command,
//! acquires the single-flight tag for its class, and hands the hardware work
//! to a spawned task so the response can go out immediately. Monitoring
//! collaborators call back into the `process_*` notification methods when
//! they detect critical conditions.

use crate::bus::{send_with_retry, BusDriver, ChassisCommand, DeviceId, PowerSetting, SensorKind};
use crate::config::Config;
use crate::mib::MibPoint;
use crate::monitor::MonitorSet;
use crate::packet::{CommandPacket, ResponsePacket};
use crate::state::{
    CommandTag, ExitCode, Fault, OperationalStatus, Pol, SensorReading, StandConfig,
    SubsystemState, SupplyKind, TagGuard, TagSet, TempStatus,
};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Rejection payload: `"0x<code>! <description>"` with an optional detail
/// suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    payload: String,
}

impl Rejection {
    pub fn from_code(code: ExitCode) -> Self {
        Self {
            payload: format!("0x{:02X}! {}", code.code(), code.description()),
        }
    }

    pub fn with_detail(code: ExitCode, detail: &str) -> Self {
        Self {
            payload: format!("0x{:02X}! {}: {}", code.code(), code.description(), detail),
        }
    }

    pub fn text(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload.into_bytes()
    }
}

struct Inner {
    config: Config,
    bus: Arc<dyn BusDriver>,
    state: RwLock<SubsystemState>,
    tags: TagSet,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    monitors: tokio::sync::Mutex<Option<MonitorSet>>,
    /// Board count of the last successful INI, reused by SHT RESTART.
    last_board_count: AtomicU8,
}

#[derive(Clone)]
pub struct AspController {
    inner: Arc<Inner>,
}

impl AspController {
    pub fn new(config: Config, bus: Arc<dyn BusDriver>) -> Self {
        let state = SubsystemState::new(config.stand_count as u16);
        Self {
            inner: Arc::new(Inner {
                config,
                bus,
                state: RwLock::new(state),
                tags: TagSet::new(),
                tasks: Mutex::new(Vec::new()),
                monitors: tokio::sync::Mutex::new(None),
                last_board_count: AtomicU8::new(0),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn snapshot(&self) -> SubsystemState {
        self.state_read().clone()
    }

    /// Validate and launch one command, producing its response. Hardware work
    /// runs in a spawned task; this returns as soon as the command is
    /// accepted or rejected.
    pub fn process_command(&self, pkt: &CommandPacket) -> ResponsePacket {
        let command = pkt.command.as_str();
        debug!(command, reference = pkt.reference, "processing command");

        let result = match command {
            "PNG" => Ok(Vec::new()),
            "RPT" => self.report(&pkt.payload).map_err(|rejection| {
                self.state_write().set_last_log(rejection.text());
                rejection
            }),
            "INI" => self.handle_ini(&pkt.payload),
            "SHT" => self.handle_sht(&pkt.payload),
            "FIL" => self.handle_stand_command(CommandTag::Fil, &pkt.payload),
            "AT1" => self.handle_stand_command(CommandTag::At1, &pkt.payload),
            "AT2" => self.handle_stand_command(CommandTag::At2, &pkt.payload),
            "ATS" => self.handle_stand_command(CommandTag::Ats, &pkt.payload),
            "FPW" => self.handle_fpw(&pkt.payload),
            "RXP" => self.handle_supply_command(CommandTag::Rxp, SupplyKind::Arx, &pkt.payload),
            "FEP" => self.handle_supply_command(CommandTag::Fep, SupplyKind::Fee, &pkt.payload),
            other => Err(Rejection::with_detail(ExitCode::NotImplemented, other)),
        };

        let status = self.state_read().status;
        match result {
            Ok(payload) => pkt.respond(true, status, payload),
            Err(rejection) => {
                warn!(command, reason = rejection.text(), "command rejected");
                pkt.respond(false, status, rejection.into_payload())
            }
        }
    }

    /// Wait for every outstanding command task to finish.
    pub async fn quiesce(&self) {
        loop {
            let handle = {
                let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
                tasks.pop()
            };
            match handle {
                Some(h) => {
                    let _ = h.await;
                }
                None => break,
            }
        }
    }

    // ---- command handlers -------------------------------------------------

    fn handle_ini(&self, payload: &[u8]) -> Result<Vec<u8>, Rejection> {
        let guard = self.acquire(CommandTag::Ini)?;
        let text = std::str::from_utf8(payload)
            .map_err(|_| Rejection::from_code(ExitCode::BadArguments))?
            .trim();
        let expected = if text.is_empty() {
            self.inner.config.boards_expected
        } else {
            let n = text
                .parse::<u8>()
                .map_err(|_| Rejection::from_code(ExitCode::BadArguments))?;
            if n == 0 || n > self.inner.config.max_boards {
                return Err(Rejection::with_detail(ExitCode::BadBoardCount, text));
            }
            n
        };

        let ctl = self.clone();
        self.spawn_task(guard, async move {
            ctl.run_initialize(expected).await;
        });
        Ok(Vec::new())
    }

    fn handle_sht(&self, payload: &[u8]) -> Result<Vec<u8>, Rejection> {
        let guard = self.acquire(CommandTag::Sht)?;
        let text = std::str::from_utf8(payload)
            .map_err(|_| Rejection::from_code(ExitCode::BadArguments))?
            .trim();
        let (scram, restart) = match text {
            "" => (false, false),
            "SCRAM" => (true, false),
            "RESTART" => (false, true),
            "SCRAM RESTART" => (true, true),
            other => return Err(Rejection::with_detail(ExitCode::BadArguments, other)),
        };

        let ctl = self.clone();
        self.spawn_task(guard, async move {
            ctl.run_shutdown(scram, restart).await;
        });
        Ok(Vec::new())
    }

    fn handle_stand_command(
        &self,
        tag: CommandTag,
        payload: &[u8],
    ) -> Result<Vec<u8>, Rejection> {
        let guard = self.acquire(tag)?;
        let stand = parse_num::<u16>(payload, 0, 3)
            .ok_or_else(|| Rejection::from_code(ExitCode::BadArguments))?;
        let value = parse_num::<u8>(payload, 3, 5)
            .ok_or_else(|| Rejection::from_code(ExitCode::BadArguments))?;
        self.check_stand(stand)?;

        let op = match tag {
            CommandTag::Fil if value > 5 => {
                return Err(Rejection::with_detail(
                    ExitCode::BadFilter,
                    &value.to_string(),
                ))
            }
            CommandTag::Fil => StandOp::Filter(value),
            _ if value > 15 => {
                return Err(Rejection::with_detail(
                    ExitCode::BadAttenuator,
                    &value.to_string(),
                ))
            }
            CommandTag::At1 => StandOp::At1(value),
            CommandTag::At2 => StandOp::At2(value),
            CommandTag::Ats => StandOp::Split(value),
            _ => return Err(Rejection::from_code(ExitCode::BadArguments)),
        };
        self.require_ready()?;

        let ctl = self.clone();
        self.spawn_task(guard, async move {
            ctl.run_stand_op(op, stand).await;
        });
        Ok(Vec::new())
    }

    fn handle_fpw(&self, payload: &[u8]) -> Result<Vec<u8>, Rejection> {
        let guard = self.acquire(CommandTag::Fpw)?;
        let stand = parse_num::<u16>(payload, 0, 3)
            .ok_or_else(|| Rejection::from_code(ExitCode::BadArguments))?;
        let pol = parse_num::<u16>(payload, 3, 4)
            .and_then(Pol::from_digit)
            .ok_or_else(|| Rejection::from_code(ExitCode::BadArguments))?;
        let code = parse_num::<u8>(payload, 4, 6)
            .ok_or_else(|| Rejection::from_code(ExitCode::BadArguments))?;
        let setting = PowerSetting::from_code(code)
            .ok_or_else(|| Rejection::with_detail(ExitCode::BadPowerSetting, &code.to_string()))?;
        self.check_stand(stand)?;
        self.require_ready()?;

        let ctl = self.clone();
        self.spawn_task(guard, async move {
            ctl.run_stand_op(StandOp::FeePower(pol, setting), stand).await;
        });
        Ok(Vec::new())
    }

    fn handle_supply_command(
        &self,
        tag: CommandTag,
        kind: SupplyKind,
        payload: &[u8],
    ) -> Result<Vec<u8>, Rejection> {
        let guard = self.acquire(tag)?;
        let code = parse_num::<u8>(payload, 0, 2)
            .ok_or_else(|| Rejection::from_code(ExitCode::BadArguments))?;
        let setting = PowerSetting::from_code(code)
            .ok_or_else(|| Rejection::with_detail(ExitCode::BadPowerSetting, &code.to_string()))?;
        self.require_ready()?;

        let ctl = self.clone();
        self.spawn_task(guard, async move {
            ctl.run_supply_power(tag, kind, setting).await;
        });
        Ok(Vec::new())
    }

    // ---- background operations --------------------------------------------

    async fn run_initialize(&self, expected: u8) -> bool {
        let cfg = &self.inner.config;
        {
            let mut st = self.state_write();
            st.initialized = false;
            st.error_fault = None;
            st.set_status(OperationalStatus::Booting);
            st.set_info("Initializing");
        }
        info!(expected, "initialization started");

        let presence = match self.inner.bus.poll_sensors(SensorKind::BoardPresence).await {
            Some(values) => values,
            None => {
                self.fail(Fault::BusFailure, "INI failed: chassis bus not responding");
                return false;
            }
        };
        let found = presence.iter().filter(|v| **v > 0.5).count() as u8;
        if found != expected {
            self.fail(
                Fault::BoardMismatch,
                &format!("INI failed: expected {} boards, found {}", expected, found),
            );
            return false;
        }

        for (kind, address) in [
            (SupplyKind::Arx, cfg.arx_supply_address),
            (SupplyKind::Fee, cfg.fee_supply_address),
        ] {
            if !self.inner.bus.set_power_state(address, PowerSetting::On).await {
                self.fail(
                    Fault::ModuleFault,
                    &format!("INI failed: {} supply did not power on", kind.name()),
                );
                return false;
            }
        }

        for board in 1..=found {
            let ok = send_with_retry(
                self.inner.bus.as_ref(),
                DeviceId::Board(board),
                ChassisCommand::InitializeBoard,
                cfg.device_retry_count,
                cfg.device_retry_delay(),
            )
            .await;
            if !ok {
                self.fail(
                    Fault::ModuleFault,
                    &format!("INI failed: board {} did not initialize", board),
                );
                return false;
            }
        }

        {
            let mut st = self.state_write();
            for stand in st.stands.iter_mut() {
                *stand = StandConfig::default();
            }
            st.boards_found = found;
            st.arx_supply.on = true;
            st.fee_supply.on = true;
            st.initialized = true;
            st.set_status(OperationalStatus::Normal);
            st.set_info("System normal");
            st.set_last_log("INI completed");
        }
        self.inner.last_board_count.store(found, Ordering::Relaxed);
        self.start_monitors().await;
        info!(boards = found, "initialization complete");
        true
    }

    async fn run_shutdown(&self, scram: bool, restart: bool) {
        let cfg = &self.inner.config;
        info!(scram, restart, "shutdown started");
        self.stop_monitors().await;
        if !scram {
            tokio::time::sleep(cfg.settle_delay()).await;
        }

        // Board shutdown is best-effort: the supplies go off regardless.
        let boards = self.state_read().boards_found;
        for board in 1..=boards {
            let _ = self
                .inner
                .bus
                .send_device_command(DeviceId::Board(board), ChassisCommand::ShutdownBoard)
                .await;
        }
        let _ = self
            .inner
            .bus
            .set_power_state(cfg.arx_supply_address, PowerSetting::Off)
            .await;
        let _ = self
            .inner
            .bus
            .set_power_state(cfg.fee_supply_address, PowerSetting::Off)
            .await;

        {
            let mut st = self.state_write();
            st.initialized = false;
            st.error_fault = None;
            st.arx_supply.on = false;
            st.fee_supply.on = false;
            st.set_status(OperationalStatus::Shutdown);
            st.set_info("System shut down");
            st.set_last_log("SHT completed");
        }
        info!("shutdown complete");

        if restart {
            let expected = match self.inner.last_board_count.load(Ordering::Relaxed) {
                0 => cfg.boards_expected,
                n => n,
            };
            self.run_initialize(expected).await;
        }
    }

    async fn run_stand_op(&self, op: StandOp, stand: u16) {
        let cfg = &self.inner.config;
        let targets: Vec<u16> = if stand == 0 {
            (1..=cfg.stand_count as u16).collect()
        } else {
            vec![stand]
        };

        for s in targets {
            let index = (s - 1) as usize;
            let board = (index / cfg.stands_per_board) as u8 + 1;
            let channel = (index % cfg.stands_per_board) as u8;
            let ok = send_with_retry(
                self.inner.bus.as_ref(),
                DeviceId::Board(board),
                op.command(channel),
                cfg.device_retry_count,
                cfg.device_retry_delay(),
            )
            .await;
            if !ok {
                self.fail(
                    Fault::ModuleFault,
                    &format!("{} failed for stand {}", op.label(), s),
                );
                return;
            }
            {
                let mut st = self.state_write();
                op.apply(&mut st.stands[index]);
            }
        }
        self.log(&format!("{} completed", op.label()));
    }

    async fn run_supply_power(&self, tag: CommandTag, kind: SupplyKind, setting: PowerSetting) {
        let address = self.supply_address(kind);
        if !self.inner.bus.set_power_state(address, setting).await {
            self.fail(
                Fault::ModuleFault,
                &format!("{} failed: {} supply did not respond", tag.as_str(), kind.name()),
            );
            return;
        }
        {
            let mut st = self.state_write();
            st.supply_mut(kind).on = setting.is_on();
        }
        self.log(&format!("{} completed", tag.as_str()));
    }

    // ---- monitoring entry points ------------------------------------------

    /// One temperature sweep: refresh readings, escalate critical
    /// temperatures, raise or clear the warning band.
    pub async fn poll_temperatures(&self) {
        let cfg = &self.inner.config;
        let Some(values) = self.inner.bus.poll_sensors(SensorKind::Temperature).await else {
            self.process_missing_bus_bridge().await;
            return;
        };

        let mut critical: Option<(usize, f64, bool)> = None;
        let mut warning = false;
        for (i, &celsius) in values.iter().enumerate() {
            if celsius >= cfg.temp_critical_c {
                critical = Some((i, celsius, true));
            } else if celsius <= cfg.temp_minimum_c {
                critical.get_or_insert((i, celsius, false));
            } else if celsius >= cfg.temp_warning_c {
                warning = true;
            }
        }

        {
            let mut st = self.state_write();
            st.sensors = values
                .iter()
                .enumerate()
                .map(|(i, &celsius)| SensorReading {
                    name: cfg.sensor_name(i),
                    celsius,
                })
                .collect();
        }

        if let Some((sensor, celsius, over)) = critical {
            self.process_critical_temperature(sensor, celsius, over).await;
            return;
        }

        let mut st = self.state_write();
        if warning {
            st.temp_status = TempStatus::Warning;
            if st.status == OperationalStatus::Normal {
                st.set_status(OperationalStatus::Warning);
                st.set_info("High chassis temperature");
                warn!("chassis temperature in warning band");
            }
            return;
        }
        st.temp_status = TempStatus::InRange;
        match (st.status, st.error_fault) {
            (OperationalStatus::Warning, _) => {
                st.set_status(OperationalStatus::Normal);
                st.set_info("System normal");
            }
            // A temperature fault clears itself once readings return to
            // range; supply and chassis faults require an INI.
            (OperationalStatus::Error, Some(fault)) if fault.is_temperature() => {
                st.error_fault = None;
                if st.initialized {
                    st.set_status(OperationalStatus::Normal);
                    st.set_info("System normal");
                } else {
                    st.set_status(OperationalStatus::Shutdown);
                    st.set_info("System shut down");
                }
                info!("temperature fault cleared");
            }
            _ => {}
        }
    }

    /// One chassis sweep: supply telemetry, per-stand FEE currents and RF
    /// powers, and a board presence check.
    pub async fn poll_chassis(&self) {
        for kind in [SupplyKind::Arx, SupplyKind::Fee] {
            let Some(values) = self.inner.bus.poll_sensors(kind.sensor()).await else {
                self.process_missing_bus_bridge().await;
                return;
            };
            let voltage = values.first().copied().unwrap_or(0.0);
            let current = values.get(1).copied().unwrap_or(0.0);
            let unit_codes = if values.len() > 2 { &values[2..] } else { &[][..] };

            let mut fault = None;
            let mut unit_status = Vec::with_capacity(unit_codes.len());
            for &code in unit_codes {
                let (label, unit_fault) = decode_unit_status(code as i64);
                unit_status.push(label.to_string());
                if fault.is_none() {
                    fault = unit_fault;
                }
            }

            {
                let mut st = self.state_write();
                let telemetry = st.supply_mut(kind);
                telemetry.voltage_v = voltage;
                telemetry.current_a = current;
                telemetry.unit_count = unit_codes.len() as u8;
                telemetry.unit_status = unit_status;
            }
            if let Some(fault) = fault {
                self.process_critical_power_supply(kind, fault).await;
            }
        }

        if let Some(values) = self.inner.bus.poll_sensors(SensorKind::FeeCurrent).await {
            let mut st = self.state_write();
            for (i, pair) in st.fee_currents.iter_mut().enumerate() {
                pair[0] = values.get(i * 2).copied().unwrap_or(0.0);
                pair[1] = values.get(i * 2 + 1).copied().unwrap_or(0.0);
            }
        }
        if let Some(values) = self.inner.bus.poll_sensors(SensorKind::RfPower).await {
            let mut st = self.state_write();
            for (i, power) in st.rf_powers.iter_mut().enumerate() {
                *power = values.get(i).copied().unwrap_or(0.0);
            }
        }

        if let Some(values) = self.inner.bus.poll_sensors(SensorKind::BoardPresence).await {
            let found = values.iter().filter(|v| **v > 0.5).count() as u8;
            let expected = self.state_read().boards_found;
            if expected > 0 && found != expected {
                self.process_unconfigured_chassis(expected, found).await;
            }
        }
    }

    /// A sensor crossed a critical threshold: both supplies go off and the
    /// subsystem enters ERROR.
    pub async fn process_critical_temperature(&self, sensor: usize, celsius: f64, over: bool) {
        let fault = if over {
            Fault::OverTemperature
        } else {
            Fault::UnderTemperature
        };
        {
            let mut st = self.state_write();
            st.temp_status = if over {
                TempStatus::OverTemp
            } else {
                TempStatus::UnderTemp
            };
            if st.error_fault == Some(fault) {
                return;
            }
        }
        error!(sensor = sensor + 1, celsius, "critical temperature");

        let (arx_on, fee_on) = {
            let st = self.state_read();
            (st.arx_supply.on, st.fee_supply.on)
        };
        if arx_on {
            let _ = self
                .inner
                .bus
                .set_power_state(self.inner.config.arx_supply_address, PowerSetting::Off)
                .await;
        }
        if fee_on {
            let _ = self
                .inner
                .bus
                .set_power_state(self.inner.config.fee_supply_address, PowerSetting::Off)
                .await;
        }

        let mut st = self.state_write();
        st.arx_supply.on = false;
        st.fee_supply.on = false;
        st.record_fault(fault);
        st.set_last_log(&format!(
            "temperature sensor {} critical at {:.1} C",
            sensor + 1,
            celsius
        ));
    }

    /// A supply reported a faulted power unit: the subsystem enters ERROR,
    /// and the supply is powered down if it was on.
    pub async fn process_critical_power_supply(&self, kind: SupplyKind, fault: Fault) {
        let was_on = {
            let st = self.state_read();
            if st.error_fault == Some(fault) {
                return;
            }
            st.supply(kind).on
        };
        error!(supply = kind.name(), ?fault, "critical power supply");
        if was_on {
            let _ = self
                .inner
                .bus
                .set_power_state(self.supply_address(kind), PowerSetting::Off)
                .await;
        }
        let mut st = self.state_write();
        st.supply_mut(kind).on = false;
        st.record_fault(fault);
        st.set_last_log(&format!("{} supply fault", kind.name()));
    }

    /// Board presence no longer matches the initialized configuration.
    pub async fn process_unconfigured_chassis(&self, expected: u8, found: u8) {
        let mut st = self.state_write();
        if st.error_fault == Some(Fault::ConfigurationLost) {
            return;
        }
        error!(expected, found, "chassis configuration lost");
        st.record_fault(Fault::ConfigurationLost);
        st.set_last_log(&format!("expected {} boards, found {}", expected, found));
    }

    /// The bus bridge itself stopped answering.
    pub async fn process_missing_bus_bridge(&self) {
        let mut st = self.state_write();
        if st.error_fault == Some(Fault::BusFailure) {
            return;
        }
        error!("chassis bus not responding");
        st.record_fault(Fault::BusFailure);
        st.set_last_log("chassis bus not responding");
    }

    // ---- monitor lifecycle ------------------------------------------------

    pub(crate) async fn start_monitors(&self) {
        let mut slot = self.inner.monitors.lock().await;
        if let Some(old) = slot.take() {
            old.stop().await;
        }
        *slot = Some(MonitorSet::spawn(self.clone(), &self.inner.config));
    }

    pub async fn stop_monitors(&self) {
        let mut slot = self.inner.monitors.lock().await;
        if let Some(old) = slot.take() {
            old.stop().await;
        }
    }

    // ---- monitor point reporting ------------------------------------------

    fn report(&self, payload: &[u8]) -> Result<Vec<u8>, Rejection> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Rejection::from_code(ExitCode::BadArguments))?
            .trim();
        let point = text
            .parse::<MibPoint>()
            .map_err(|e| Rejection::with_detail(ExitCode::BadArguments, &e.to_string()))?;

        let cfg = &self.inner.config;
        let st = self.state_read();
        let value = match point {
            MibPoint::Summary => st.status.display_code().to_string(),
            MibPoint::Info => st.info.to_string(),
            MibPoint::LastLog => st.last_log.to_string(),
            MibPoint::Subsystem => cfg.subsystem.clone(),
            MibPoint::SerialNo => cfg.serial_number.clone(),
            MibPoint::Version => env!("CARGO_PKG_VERSION").to_string(),
            MibPoint::Filter(n) => self.stand(&st, n, text)?.filter.to_string(),
            MibPoint::At1(n) => self.stand(&st, n, text)?.at1.to_string(),
            MibPoint::At2(n) => self.stand(&st, n, text)?.at2.to_string(),
            MibPoint::AtSplit(n) => self.stand(&st, n, text)?.ats.to_string(),
            MibPoint::FeePower(pol, n) => {
                let stand = self.stand(&st, n, text)?;
                let on = match pol {
                    Pol::Pol1 => stand.power_pol1,
                    Pol::Pol2 => stand.power_pol2,
                };
                if on { "11" } else { "00" }.to_string()
            }
            MibPoint::FeeCurrent(pol, n) => {
                let index = self.stand_index(n, text)?;
                format!("{:.3}", st.fee_currents[index][pol.index()])
            }
            MibPoint::RfPower(n) => {
                let index = self.stand_index(n, text)?;
                format!("{:.3}", st.rf_powers[index])
            }
            MibPoint::ArxSupply => supply_state(&st, SupplyKind::Arx),
            MibPoint::ArxSupplyNo => st.arx_supply.unit_count.to_string(),
            MibPoint::ArxPowerUnit(n) => unit_status(&st, SupplyKind::Arx, n, text)?,
            MibPoint::ArxCurrent => format!("{:.1}", st.arx_supply.current_a * 1000.0),
            MibPoint::ArxVoltage => format!("{:.2}", st.arx_supply.voltage_v),
            MibPoint::FeeSupply => supply_state(&st, SupplyKind::Fee),
            MibPoint::FeeSupplyNo => st.fee_supply.unit_count.to_string(),
            MibPoint::FeePowerUnit(n) => unit_status(&st, SupplyKind::Fee, n, text)?,
            MibPoint::FeeTotalCurrent => format!("{:.1}", st.fee_supply.current_a * 1000.0),
            MibPoint::FeeVoltage => format!("{:.2}", st.fee_supply.voltage_v),
            MibPoint::TempStatus => st.temp_status.display_code().to_string(),
            MibPoint::TempSenseNo => st.sensors.len().to_string(),
            MibPoint::SensorName(n) => {
                let sensor = st
                    .sensors
                    .get(n.checked_sub(1).map(usize::from).unwrap_or(usize::MAX))
                    .ok_or_else(|| Rejection::with_detail(ExitCode::BadArguments, text))?;
                sensor.name.clone()
            }
            MibPoint::SensorData(n) => {
                let sensor = st
                    .sensors
                    .get(n.checked_sub(1).map(usize::from).unwrap_or(usize::MAX))
                    .ok_or_else(|| Rejection::with_detail(ExitCode::BadArguments, text))?;
                format!("{:.2}", sensor.celsius)
            }
        };
        Ok(value.into_bytes())
    }

    fn stand<'a>(
        &self,
        st: &'a SubsystemState,
        n: u16,
        entry: &str,
    ) -> Result<&'a StandConfig, Rejection> {
        let index = self.stand_index(n, entry)?;
        Ok(&st.stands[index])
    }

    fn stand_index(&self, n: u16, entry: &str) -> Result<usize, Rejection> {
        if n == 0 || n as usize > self.inner.config.stand_count {
            return Err(Rejection::with_detail(ExitCode::BadStand, entry));
        }
        Ok((n - 1) as usize)
    }

    // ---- shared plumbing --------------------------------------------------

    fn acquire(&self, tag: CommandTag) -> Result<TagGuard, Rejection> {
        self.inner
            .tags
            .try_acquire(tag)
            .ok_or_else(|| Rejection::from_code(ExitCode::Blocking))
    }

    fn require_ready(&self) -> Result<(), Rejection> {
        if self.state_read().ready {
            Ok(())
        } else {
            Err(Rejection::from_code(ExitCode::NotReady))
        }
    }

    fn check_stand(&self, stand: u16) -> Result<(), Rejection> {
        if stand as usize > self.inner.config.stand_count {
            return Err(Rejection::with_detail(
                ExitCode::BadStand,
                &stand.to_string(),
            ));
        }
        Ok(())
    }

    fn supply_address(&self, kind: SupplyKind) -> u8 {
        match kind {
            SupplyKind::Arx => self.inner.config.arx_supply_address,
            SupplyKind::Fee => self.inner.config.fee_supply_address,
        }
    }

    fn spawn_task(&self, guard: TagGuard, fut: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(async move {
            let _tag = guard;
            fut.await;
        });
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn fail(&self, fault: Fault, log: &str) {
        error!("{log}");
        let mut st = self.state_write();
        st.record_fault(fault);
        st.set_last_log(log);
    }

    fn log(&self, msg: &str) {
        info!("{msg}");
        self.state_write().set_last_log(msg);
    }

    fn state_read(&self) -> RwLockReadGuard<'_, SubsystemState> {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn state_write(&self) -> RwLockWriteGuard<'_, SubsystemState> {
        self.inner.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Hardware operation applied to one stand or broadcast to all of them.
#[derive(Debug, Clone, Copy)]
enum StandOp {
    Filter(u8),
    At1(u8),
    At2(u8),
    Split(u8),
    FeePower(Pol, PowerSetting),
}

impl StandOp {
    fn command(self, channel: u8) -> ChassisCommand {
        match self {
            StandOp::Filter(code) => ChassisCommand::SetFilter { channel, code },
            StandOp::At1(setting) => ChassisCommand::SetAt1 { channel, setting },
            StandOp::At2(setting) => ChassisCommand::SetAt2 { channel, setting },
            StandOp::Split(setting) => ChassisCommand::SetAtSplit { channel, setting },
            StandOp::FeePower(pol, setting) => ChassisCommand::SetFeePower {
                channel,
                pol,
                setting,
            },
        }
    }

    fn apply(self, stand: &mut StandConfig) {
        match self {
            StandOp::Filter(code) => stand.filter = code,
            StandOp::At1(setting) => stand.at1 = setting,
            StandOp::At2(setting) => stand.at2 = setting,
            StandOp::Split(setting) => stand.ats = setting,
            StandOp::FeePower(Pol::Pol1, setting) => stand.power_pol1 = setting.is_on(),
            StandOp::FeePower(Pol::Pol2, setting) => stand.power_pol2 = setting.is_on(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            StandOp::Filter(_) => "FIL",
            StandOp::At1(_) => "AT1",
            StandOp::At2(_) => "AT2",
            StandOp::Split(_) => "ATS",
            StandOp::FeePower(..) => "FPW",
        }
    }
}

fn supply_state(st: &SubsystemState, kind: SupplyKind) -> String {
    if st.supply(kind).on { "ON" } else { "OFF" }.to_string()
}

fn unit_status(
    st: &SubsystemState,
    kind: SupplyKind,
    n: u16,
    entry: &str,
) -> Result<String, Rejection> {
    st.supply(kind)
        .unit_status
        .get(n.checked_sub(1).map(usize::from).unwrap_or(usize::MAX))
        .cloned()
        .ok_or_else(|| Rejection::with_detail(ExitCode::BadArguments, entry))
}

fn decode_unit_status(code: i64) -> (&'static str, Option<Fault>) {
    match code {
        0 => ("OK", None),
        1 => ("OVER-VOLT", Some(Fault::OverVoltage)),
        2 => ("UNDER-VOLT", Some(Fault::UnderVoltage)),
        3 => ("OVER-CURRENT", Some(Fault::OverCurrent)),
        _ => ("FAULT", Some(Fault::ModuleFault)),
    }
}

fn parse_num<T: std::str::FromStr>(payload: &[u8], start: usize, end: usize) -> Option<T> {
    payload
        .get(start..end)
        .and_then(|bytes| std::str::from_utf8(bytes).ok())
        .and_then(|s| s.trim().parse::<T>().ok())
}
