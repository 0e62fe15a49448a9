//! MJD/MPM timestamp pair used throughout the command protocol.

use chrono::{DateTime, Datelike, Timelike, Utc};

// Days from the proleptic-Gregorian epoch (0001-01-01) to the MJD epoch
// (1858-11-17).
const CE_TO_MJD_DAYS: i32 = 678_576;

/// Modified Julian Day and milliseconds past midnight for the given UTC
/// instant. Pure function of its argument.
pub fn mjd_mpm(t: DateTime<Utc>) -> (u32, u32) {
    let mjd = t.date_naive().num_days_from_ce() - CE_TO_MJD_DAYS;
    let mpm = t.time().num_seconds_from_midnight() * 1000 + t.timestamp_subsec_millis();
    (mjd as u32, mpm)
}

/// Current MJD/MPM pair. Recomputed on every call; responses must not cache
/// this across sends.
pub fn now() -> (u32, u32) {
    mjd_mpm(Utc::now())
}
