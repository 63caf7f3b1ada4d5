//! ---
//! oe10_section: "02-protocol-framing"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "OE10-104 framing, checksum and response decoding."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! Static command catalogue and payload encoders.

use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::types::DriveDirection;

/// Upper bound of a proportional speed byte.
pub const MAX_SPEED: u8 = 100;

/// Two-character command codes understood by the unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr, Serialize,
)]
pub enum CommandCode {
    /// Query status bitfields and positions.
    #[strum(serialize = "ST")]
    Status,
    /// Query protocol version.
    #[strum(serialize = "PV")]
    ProtocolVersion,
    /// Query software version.
    #[strum(serialize = "CV")]
    SoftwareVersion,
    /// Absolute pan position.
    #[strum(serialize = "PP")]
    PanPosition,
    /// Absolute tilt position, non-negative targets.
    #[strum(serialize = "TP")]
    TiltPosition,
    /// Jog pan left.
    #[strum(serialize = "PL")]
    PanLeft,
    /// Jog pan right.
    #[strum(serialize = "PR")]
    PanRight,
    /// Stop pan.
    #[strum(serialize = "PS")]
    PanStop,
    /// Jog tilt up.
    #[strum(serialize = "TU")]
    TiltUp,
    /// Jog tilt down, or absolute negative tilt when a payload is attached.
    #[strum(serialize = "TD")]
    TiltDown,
    /// Stop tilt.
    #[strum(serialize = "TS")]
    TiltStop,
    /// Proportional speed control.
    #[strum(serialize = "PC")]
    ProportionalControl,
    /// Proportional speed control echoing both positions.
    #[strum(serialize = "PF")]
    ProportionalFeedback,
    /// Assign a new peripheral id.
    #[strum(serialize = "SI")]
    SetPeripheralId,
    /// Error diagnosis dump.
    #[strum(serialize = "ED")]
    ErrorDiagnosis,
}

impl CommandCode {
    /// Wire code as a static string.
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Wire code as bytes.
    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Catalogue entry for this code.
    pub fn descriptor(self) -> &'static CommandDescriptor {
        &CATALOGUE[self as usize]
    }
}

/// How a command's request payload is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// No data field content.
    Empty,
    /// Three ASCII decimal digits.
    Position,
    /// Either empty or three ASCII decimal digits.
    OptionalPosition,
    /// Direction byte, two speed bytes and a reserved zero.
    PackedDrive,
    /// One byte rendered as two upper-case hex digits.
    HexByte,
}

impl PayloadFormat {
    /// Whether `payload` is laid out as this format requires.
    pub fn accepts(self, payload: &[u8]) -> bool {
        let is_position = |p: &[u8]| p.len() == 3 && p.iter().all(u8::is_ascii_digit);
        match self {
            PayloadFormat::Empty => payload.is_empty(),
            PayloadFormat::Position => is_position(payload),
            PayloadFormat::OptionalPosition => payload.is_empty() || is_position(payload),
            PayloadFormat::PackedDrive => payload.len() == 4 && payload[3] == 0x00,
            PayloadFormat::HexByte => {
                payload.len() == 2 && payload.iter().all(u8::is_ascii_hexdigit)
            }
        }
    }

    /// Encode `arg` into this layout; `None` when the argument does not fit it.
    pub fn encode(self, arg: &RequestArg) -> Option<Vec<u8>> {
        match (self, arg) {
            (PayloadFormat::Empty | PayloadFormat::OptionalPosition, RequestArg::None) => {
                Some(Vec::new())
            }
            (
                PayloadFormat::Position | PayloadFormat::OptionalPosition,
                RequestArg::Position(value),
            ) => Some(encode_position(*value)),
            (PayloadFormat::PackedDrive, RequestArg::Drive(drive)) => Some(encode_drive(drive)),
            (PayloadFormat::HexByte, RequestArg::PeripheralId(id)) => {
                Some(encode_peripheral_id(*id))
            }
            _ => None,
        }
    }
}

/// Typed argument of a request, before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestArg {
    /// No argument.
    None,
    /// Whole-degree position or tilt magnitude.
    Position(u16),
    /// Proportional drive directions and speeds.
    Drive(ProportionalDrive),
    /// New peripheral address.
    PeripheralId(u8),
}

/// Decoder applied to an acknowledged reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Acknowledgement only.
    Empty,
    /// Status bitfields and positions.
    Status,
    /// Version triplet.
    Version,
    /// Single echoed position.
    Position,
    /// Echoed pan and tilt positions.
    DualPosition,
    /// Bytes passed through verbatim.
    Raw,
}

/// Static description of one protocol command.
#[derive(Debug, Clone, Copy)]
pub struct CommandDescriptor {
    /// Wire code.
    pub code: CommandCode,
    /// Operation name used in logs.
    pub operation: &'static str,
    /// Request payload layout.
    pub payload: PayloadFormat,
    /// Decoder for the acknowledged reply.
    pub reply: ReplyKind,
    /// Safe to retransmit after a garbled reply.
    pub idempotent: bool,
}

impl CommandDescriptor {
    /// Prefix an acknowledged reply must start with to belong to this request.
    pub fn reply_prefix(&self) -> &'static [u8] {
        self.code.as_bytes()
    }

    /// Request payload for `arg`, laid out as this command expects.
    pub fn encode_payload(&self, arg: &RequestArg) -> Option<Vec<u8>> {
        self.payload.encode(arg)
    }
}

const fn entry(
    code: CommandCode,
    operation: &'static str,
    payload: PayloadFormat,
    reply: ReplyKind,
    idempotent: bool,
) -> CommandDescriptor {
    CommandDescriptor {
        code,
        operation,
        payload,
        reply,
        idempotent,
    }
}

/// Catalogue indexed by `CommandCode as usize`.
pub static CATALOGUE: [CommandDescriptor; 15] = [
    entry(CommandCode::Status, "query_status", PayloadFormat::Empty, ReplyKind::Status, true),
    entry(CommandCode::ProtocolVersion, "query_protocol_version", PayloadFormat::Empty, ReplyKind::Version, true),
    entry(CommandCode::SoftwareVersion, "query_software_version", PayloadFormat::Empty, ReplyKind::Version, true),
    entry(CommandCode::PanPosition, "move_pan_to", PayloadFormat::Position, ReplyKind::Position, false),
    entry(CommandCode::TiltPosition, "move_tilt_to", PayloadFormat::Position, ReplyKind::Position, false),
    entry(CommandCode::PanLeft, "jog_pan_left", PayloadFormat::Empty, ReplyKind::Position, false),
    entry(CommandCode::PanRight, "jog_pan_right", PayloadFormat::Empty, ReplyKind::Position, false),
    entry(CommandCode::PanStop, "stop_pan", PayloadFormat::Empty, ReplyKind::Position, true),
    entry(CommandCode::TiltUp, "jog_tilt_up", PayloadFormat::Empty, ReplyKind::Position, false),
    entry(CommandCode::TiltDown, "jog_tilt_down", PayloadFormat::OptionalPosition, ReplyKind::Position, false),
    entry(CommandCode::TiltStop, "stop_tilt", PayloadFormat::Empty, ReplyKind::Position, true),
    entry(CommandCode::ProportionalControl, "drive_proportional", PayloadFormat::PackedDrive, ReplyKind::Empty, false),
    entry(CommandCode::ProportionalFeedback, "drive_proportional_with_feedback", PayloadFormat::PackedDrive, ReplyKind::DualPosition, false),
    entry(CommandCode::SetPeripheralId, "reassign_peripheral_id", PayloadFormat::HexByte, ReplyKind::Empty, false),
    entry(CommandCode::ErrorDiagnosis, "diagnose", PayloadFormat::Empty, ReplyKind::Raw, true),
];

/// Direction and speed request for proportional control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProportionalDrive {
    /// Pan direction.
    pub pan: DriveDirection,
    /// Tilt direction.
    pub tilt: DriveDirection,
    /// Pan speed in `0..=100`.
    pub pan_speed: u8,
    /// Tilt speed in `0..=100`.
    pub tilt_speed: u8,
}

impl ProportionalDrive {
    /// Clamp caller values onto the protocol ranges.
    pub fn new(pan_direction: i32, tilt_direction: i32, pan_speed: i32, tilt_speed: i32) -> Self {
        Self {
            pan: DriveDirection::from_signum(pan_direction),
            tilt: DriveDirection::from_signum(tilt_direction),
            pan_speed: clamp_speed(pan_speed),
            tilt_speed: clamp_speed(tilt_speed),
        }
    }

    /// Packed direction byte: pan in bits 0-1, tilt in bits 2-3.
    pub fn direction_byte(&self) -> u8 {
        self.pan.bits() | (self.tilt.bits() << 2)
    }
}

fn clamp_speed(speed: i32) -> u8 {
    speed.clamp(0, i32::from(MAX_SPEED)) as u8
}

/// Three-digit zero-padded decimal, saturating at 999.
pub fn encode_position(value: u16) -> Vec<u8> {
    format!("{:03}", value.min(999)).into_bytes()
}

/// `[direction, pan_speed, tilt_speed, reserved]`.
pub fn encode_drive(drive: &ProportionalDrive) -> Vec<u8> {
    vec![drive.direction_byte(), drive.pan_speed, drive.tilt_speed, 0x00]
}

/// Peripheral id as two upper-case hex digits.
pub fn encode_peripheral_id(id: u8) -> Vec<u8> {
    hex::encode_upper([id]).into_bytes()
}
