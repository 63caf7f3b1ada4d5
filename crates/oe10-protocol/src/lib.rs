//! ---
//! oe10_section: "02-protocol-framing"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "OE10-104 framing, checksum and response decoding."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! Pure protocol layer for OE10-104 pan/tilt units: checksum, frame codec,
//! command catalogue and reply interpretation. Nothing here performs I/O.
#![warn(missing_docs)]

pub mod catalogue;
pub mod checksum;
pub mod frame;
pub mod response;
pub mod types;

/// Start-of-frame marker `<`.
pub const START_MARKER: u8 = 0x3C;
/// End-of-frame marker `>`.
pub const END_MARKER: u8 = 0x3E;
/// Field separator `:`.
pub const SEPARATOR: u8 = 0x3A;
/// Positive acknowledgement byte in the command position of a reply.
pub const ACK: u8 = 0x06;
/// Negative acknowledgement byte in the command position of a reply.
pub const NAK: u8 = 0x15;
/// Fixed address of the controlling host.
pub const CONTROLLER_ID: u8 = 0x01;
/// Address every peripheral listens to.
pub const BROADCAST_ID: u8 = 0xFF;

pub use catalogue::{
    CommandCode, CommandDescriptor, PayloadFormat, ProportionalDrive, ReplyKind, RequestArg,
    CATALOGUE,
};
pub use checksum::{Checksum, ChecksumIndicator};
pub use frame::{decode, encode, hex_dump, Frame, FrameAssembler, FramingError};
pub use response::{
    classify, interpret, DecodeError, NakCode, ProtocolError, Reply, Response,
};
pub use types::{
    Axis, Diagnostics, Direction, DriveDirection, FirmwareVersion, Position, StatusSnapshot,
    VersionReport,
};
