//! ---
//! oe10_section: "02-protocol-framing"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "OE10-104 framing, checksum and response decoding."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Mechanical axis of the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Horizontal rotation.
    Pan,
    /// Vertical rotation.
    Tilt,
}

/// Signed jog direction. Positive is right for pan and up for tilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Towards decreasing angle (pan left, tilt down).
    Negative,
    /// Towards increasing angle (pan right, tilt up).
    Positive,
}

/// Per-axis motion requested through proportional control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveDirection {
    /// Axis holds still.
    #[default]
    Stop,
    /// Axis moves towards increasing angle.
    Positive,
    /// Axis moves towards decreasing angle.
    Negative,
}

impl DriveDirection {
    /// Clamp an arbitrary signed value onto stop/positive/negative.
    pub fn from_signum(value: i32) -> Self {
        match value.signum() {
            1 => DriveDirection::Positive,
            -1 => DriveDirection::Negative,
            _ => DriveDirection::Stop,
        }
    }

    /// Two-bit field value used in the packed direction byte.
    pub const fn bits(self) -> u8 {
        match self {
            DriveDirection::Stop => 0b00,
            DriveDirection::Positive => 0b01,
            DriveDirection::Negative => 0b10,
        }
    }
}

/// Last confirmed position of both axes, in whole degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Position {
    /// Pan angle in `0..360`.
    pub pan: u16,
    /// Tilt angle in `-90..=90`.
    pub tilt: i16,
}

/// Decoded device status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Capability bit 3.
    pub pan_supported: bool,
    /// Capability bit 4.
    pub tilt_supported: bool,
    /// Error bit 5.
    pub error_present: bool,
    /// Low nibble of the environment byte, `n * 5 - 5`.
    pub temperature_c: i16,
    /// High nibble of the environment byte, `n * 100 / 16`.
    pub humidity_pct: u8,
    /// Pan position reported by the unit.
    pub pan_position: u16,
    /// Tilt position reported by the unit (unsigned on the wire).
    pub tilt_position: u16,
    /// Raw capability byte.
    pub capability_bits: u8,
    /// Raw error byte.
    pub error_bits: u8,
    /// When the snapshot was decoded.
    pub captured_at: DateTime<Utc>,
}

/// Three-component version reported by `PV` and `CV`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareVersion {
    /// First character pair.
    pub major: String,
    /// Second character pair.
    pub minor: String,
    /// Third character pair.
    pub revision: String,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// Protocol and software versions of the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionReport {
    /// Version answered to `PV`.
    pub protocol: FirmwareVersion,
    /// Version answered to `CV`.
    pub software: FirmwareVersion,
}

/// Payload answered to an error diagnosis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Bytes exactly as received.
    pub raw: Vec<u8>,
    /// Upper-case hex rendering of `raw`.
    pub hex: String,
    /// Printable rendering of `raw`, non-printables shown as `.`.
    pub text: String,
}

impl Diagnostics {
    /// Wrap raw diagnostic bytes.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        let hex = hex::encode_upper(&raw);
        let text = raw
            .iter()
            .map(|&b| match b {
                0x20..=0x7E => b as char,
                _ => '.',
            })
            .collect();
        Self { raw, hex, text }
    }
}
