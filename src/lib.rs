//! Subsystem controller for a radio-telescope analog signal conditioning
//! chassis.
//!
//! The crate speaks a fixed-width ASCII command protocol over UDP: a master
//! control station sends commands (PNG, RPT, INI, SHT, the per-stand analog
//! settings, and the supply power switches), and the controller answers each
//! with an accept/reject response carrying the current subsystem status.
//! Command execution is asynchronous: hardware work runs in background tasks
//! guarded by per-command-class single-flight tags, while responses are
//! delivered in order with bounded retry.
//!
//! The `aspd` binary wires the controller to a real socket and a simulated
//! chassis bus; [`bus::BusDriver`] is the seam where real hardware plugs in.

#![forbid(unsafe_code)]

pub mod bus;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod mib;
pub mod monitor;
pub mod packet;
pub mod server;
pub mod state;
pub mod timecode;

pub use bus::{BusDriver, ChassisCommand, DeviceId, PowerSetting, SensorKind, SimulatedBus};
pub use config::{Config, ConfigError};
pub use controller::AspController;
pub use dispatch::{Dispatcher, InboundItem, ResponseSink, RetryPolicy};
pub use packet::{CommandPacket, PacketError, ResponsePacket};
pub use state::{ExitCode, Fault, OperationalStatus, SubsystemState, SupplyKind};
