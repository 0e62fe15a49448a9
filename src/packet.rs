//! Fixed-width ASCII frame codec for the command protocol.
//!
//! Command frames arrive from the master control station; response frames go
//! back over the same socket. All numeric fields are right-justified ASCII
//! decimal. Layout (0-indexed, half-open):
//!
//! ```text
//! DST[0:3] SRC[3:6] CMD[6:9] REF[9:18] LEN[18:22] MJD[22:28] MPM[28:37] GAP[37] PAYLOAD[38:38+LEN]
//! ```
//!
//! A response reuses the header layout; the byte at offset 37 is a space, the
//! byte at 38 is the accepted flag ('A' or 'R'), bytes 39..46 carry the
//! right-justified system status, and LEN counts flag + status + payload.

use crate::state::OperationalStatus;
use crate::timecode;
use arrayvec::ArrayString;
use static_assertions::const_assert_eq;
use thiserror::Error;

pub const HEADER_LEN: usize = 37;
pub const PAYLOAD_OFFSET: usize = 38;
/// Accepted flag (1) plus status field (7) prepended to response payloads.
pub const RESPONSE_OVERHEAD: usize = 8;
/// Upper bound on any frame we will receive or build.
pub const MAX_FRAME_LEN: usize = 8192;

const DST_END: usize = 3;
const SRC_END: usize = 6;
const CMD_END: usize = 9;
const REF_END: usize = 18;
const LEN_END: usize = 22;
const MJD_END: usize = 28;
const MPM_END: usize = 37;

const_assert_eq!(MPM_END, HEADER_LEN);
const_assert_eq!(PAYLOAD_OFFSET, HEADER_LEN + 1);

/// Three-character subsystem/command identifier.
pub type FieldCode = ArrayString<3>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),
    #[error("non-numeric {0} field")]
    BadField(&'static str),
    #[error("payload shorter than declared length: declared {declared}, available {available}")]
    PayloadShort { declared: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub destination: FieldCode,
    pub sender: FieldCode,
    pub command: FieldCode,
    /// Opaque reference echoed verbatim in the response.
    pub reference: u32,
    pub data_length: usize,
    pub mjd: u32,
    pub mpm: u32,
    pub payload: Vec<u8>,
}

impl CommandPacket {
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < PAYLOAD_OFFSET {
            return Err(PacketError::Truncated(data.len()));
        }
        let destination = code_field(data, 0, DST_END, "destination")?;
        let sender = code_field(data, DST_END, SRC_END, "sender")?;
        let command = code_field(data, SRC_END, CMD_END, "command")?;
        let reference = numeric_field(data, CMD_END, REF_END, "reference")?;
        let data_length = numeric_field(data, REF_END, LEN_END, "data length")? as usize;
        let mjd = numeric_field(data, LEN_END, MJD_END, "MJD")?;
        let mpm = numeric_field(data, MJD_END, MPM_END, "MPM")?;

        let available = data.len() - PAYLOAD_OFFSET;
        if available < data_length {
            return Err(PacketError::PayloadShort {
                declared: data_length,
                available,
            });
        }
        let payload = data[PAYLOAD_OFFSET..PAYLOAD_OFFSET + data_length].to_vec();

        Ok(Self {
            destination,
            sender,
            command,
            reference,
            data_length,
            mjd,
            mpm,
            payload,
        })
    }

    /// Build the response to this command: destination and sender swap,
    /// reference carries over verbatim.
    pub fn respond(
        &self,
        accepted: bool,
        status: OperationalStatus,
        payload: Vec<u8>,
    ) -> ResponsePacket {
        ResponsePacket {
            destination: self.sender,
            sender: self.destination,
            command: self.command,
            reference: self.reference,
            accepted,
            status,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    pub destination: FieldCode,
    pub sender: FieldCode,
    pub command: FieldCode,
    pub reference: u32,
    pub accepted: bool,
    pub status: OperationalStatus,
    pub payload: Vec<u8>,
}

impl ResponsePacket {
    /// Encode with a fresh MJD/MPM timestamp.
    pub fn encode(&self) -> Vec<u8> {
        let (mjd, mpm) = timecode::now();
        self.encode_at(mjd, mpm)
    }

    pub fn encode_at(&self, mjd: u32, mpm: u32) -> Vec<u8> {
        let mut frame = format!(
            "{:<3}{:<3}{:<3}{:>9}{:0>4}{:>6}{:>9} {}{:>7}",
            self.destination,
            self.sender,
            self.command,
            self.reference,
            self.payload.len() + RESPONSE_OVERHEAD,
            mjd,
            mpm,
            if self.accepted { 'A' } else { 'R' },
            self.status.display_code(),
        )
        .into_bytes();
        frame.extend_from_slice(&self.payload);
        frame
    }
}

fn code_field(
    data: &[u8],
    start: usize,
    end: usize,
    name: &'static str,
) -> Result<FieldCode, PacketError> {
    let text = std::str::from_utf8(&data[start..end]).map_err(|_| PacketError::BadField(name))?;
    FieldCode::from(text).map_err(|_| PacketError::BadField(name))
}

fn numeric_field(
    data: &[u8],
    start: usize,
    end: usize,
    name: &'static str,
) -> Result<u32, PacketError> {
    std::str::from_utf8(&data[start..end])
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or(PacketError::BadField(name))
}
