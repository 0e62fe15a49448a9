//! Typed parser for RPT monitor-point names.
//!
//! The RPT payload names one entry out of a fixed vocabulary. Parsing happens
//! once, up front, into a [`MibPoint`] with any numeric argument already
//! validated as a number; index range checks against the configured stand
//! count happen in the controller.

use crate::state::Pol;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MibError {
    #[error("unknown MIB entry: {0}")]
    Unknown(String),
    #[error("bad index in MIB entry: {0}")]
    BadIndex(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MibPoint {
    Summary,
    Info,
    LastLog,
    Subsystem,
    SerialNo,
    Version,
    Filter(u16),
    At1(u16),
    At2(u16),
    AtSplit(u16),
    FeePower(Pol, u16),
    FeeCurrent(Pol, u16),
    RfPower(u16),
    ArxSupply,
    ArxSupplyNo,
    ArxPowerUnit(u16),
    ArxCurrent,
    ArxVoltage,
    FeeSupply,
    FeeSupplyNo,
    FeePowerUnit(u16),
    FeeTotalCurrent,
    FeeVoltage,
    TempStatus,
    TempSenseNo,
    SensorName(u16),
    SensorData(u16),
}

impl FromStr for MibPoint {
    type Err = MibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "SUMMARY" => return Ok(MibPoint::Summary),
            "INFO" => return Ok(MibPoint::Info),
            "LASTLOG" => return Ok(MibPoint::LastLog),
            "SUBSYSTEM" => return Ok(MibPoint::Subsystem),
            "SERIALNO" => return Ok(MibPoint::SerialNo),
            "VERSION" => return Ok(MibPoint::Version),
            "ARXSUPPLY" => return Ok(MibPoint::ArxSupply),
            "ARXSUPPLY-NO" => return Ok(MibPoint::ArxSupplyNo),
            "ARXCURR" => return Ok(MibPoint::ArxCurrent),
            "ARXVOLT" => return Ok(MibPoint::ArxVoltage),
            "FEESUPPLY" => return Ok(MibPoint::FeeSupply),
            "FEESUPPLY-NO" => return Ok(MibPoint::FeeSupplyNo),
            "FEECURR" => return Ok(MibPoint::FeeTotalCurrent),
            "FEEVOLT" => return Ok(MibPoint::FeeVoltage),
            "TEMP-STATUS" => return Ok(MibPoint::TempStatus),
            "TEMP-SENSE-NO" => return Ok(MibPoint::TempSenseNo),
            _ => {}
        }

        const NUMBERED: &[(&str, fn(u16) -> MibPoint)] = &[
            ("FILTER_", MibPoint::Filter),
            ("AT1_", MibPoint::At1),
            ("AT2_", MibPoint::At2),
            ("ATSPLIT_", MibPoint::AtSplit),
            ("FEEPOL1PWR_", |n| MibPoint::FeePower(Pol::Pol1, n)),
            ("FEEPOL2PWR_", |n| MibPoint::FeePower(Pol::Pol2, n)),
            ("FEEPOL1CUR_", |n| MibPoint::FeeCurrent(Pol::Pol1, n)),
            ("FEEPOL2CUR_", |n| MibPoint::FeeCurrent(Pol::Pol2, n)),
            ("RFPWR_", MibPoint::RfPower),
            ("ARXPWRUNIT_", MibPoint::ArxPowerUnit),
            ("FEEPWRUNIT_", MibPoint::FeePowerUnit),
            ("SENSOR-NAME-", MibPoint::SensorName),
            ("SENSOR-DATA-", MibPoint::SensorData),
        ];

        for (prefix, build) in NUMBERED {
            if let Some(rest) = s.strip_prefix(prefix) {
                let index = rest
                    .parse::<u16>()
                    .map_err(|_| MibError::BadIndex(s.to_string()))?;
                return Ok(build(index));
            }
        }

        Err(MibError::Unknown(s.to_string()))
    }
}
