//! ---
//! oe10_section: "02-protocol-framing"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "OE10-104 framing, checksum and response decoding."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! Reply classification and typed payload decoders.

use std::fmt;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::catalogue::{CommandDescriptor, ReplyKind};
use crate::frame::{hex_dump, Frame};
use crate::types::{FirmwareVersion, StatusSnapshot};
use crate::{ACK, NAK};

/// Minimum status payload: three bitfield bytes and two 3-digit positions.
pub const STATUS_PAYLOAD_LEN: usize = 9;
/// Version payload: three pairs of hex digits.
pub const VERSION_PAYLOAD_LEN: usize = 6;
/// Width of an echoed position.
pub const POSITION_DIGITS: usize = 3;

const PAN_SUPPORTED_BIT: u8 = 1 << 3;
const TILT_SUPPORTED_BIT: u8 = 1 << 4;
const ERROR_PRESENT_BIT: u8 = 1 << 5;

/// Error codes carried by a negative acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NakCode {
    /// Another controller holds the unit.
    DeviceAlreadyControlled,
    /// Unit understood the command but cannot execute it.
    CommandUnsupported,
    /// Unit did not recognise the command.
    CommandNotRecognized,
    /// Unit timed out internally.
    DeviceTimeout,
    /// Any code outside the table.
    Unknown(u8),
}

impl NakCode {
    /// Map a raw code, never failing.
    pub fn from_byte(code: u8) -> Self {
        match code {
            0x04 => NakCode::DeviceAlreadyControlled,
            0x08 => NakCode::CommandUnsupported,
            0x10 => NakCode::CommandNotRecognized,
            0x20 => NakCode::DeviceTimeout,
            other => NakCode::Unknown(other),
        }
    }

    /// Raw code as transmitted.
    pub fn code(self) -> u8 {
        match self {
            NakCode::DeviceAlreadyControlled => 0x04,
            NakCode::CommandUnsupported => 0x08,
            NakCode::CommandNotRecognized => 0x10,
            NakCode::DeviceTimeout => 0x20,
            NakCode::Unknown(other) => other,
        }
    }

    /// Human-readable reason.
    pub fn reason(self) -> &'static str {
        match self {
            NakCode::DeviceAlreadyControlled => "device already controlled",
            NakCode::CommandUnsupported => "command unsupported by device",
            NakCode::CommandNotRecognized => "command not recognized",
            NakCode::DeviceTimeout => "device timeout",
            NakCode::Unknown(_) => "unknown device error",
        }
    }
}

impl fmt::Display for NakCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.reason(), self.code())
    }
}

/// Classification of a decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Positive acknowledgement with its payload.
    Ack {
        /// Reply payload, echoed command code first.
        payload: Vec<u8>,
    },
    /// Negative acknowledgement.
    Nak {
        /// Mapped error code.
        code: NakCode,
    },
    /// Command field held neither ACK nor NAK.
    Unrecognized {
        /// The unexpected command field.
        field: Vec<u8>,
    },
}

/// Inspect the command field of a reply.
pub fn classify(frame: &Frame) -> Response {
    match frame.command() {
        [ACK] => Response::Ack {
            payload: frame.payload().to_vec(),
        },
        // A NAK without a code still classifies; 0x00 is outside the table.
        [NAK] => Response::Nak {
            code: NakCode::from_byte(frame.payload().first().copied().unwrap_or(0x00)),
        },
        other => Response::Unrecognized {
            field: other.to_vec(),
        },
    }
}

/// Typed payload decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload shorter than the decoder requires.
    #[error("{kind} payload needs {expected} bytes, got {actual}")]
    TooShort {
        /// Decoder name.
        kind: &'static str,
        /// Required length.
        expected: usize,
        /// Received length.
        actual: usize,
    },
    /// Field expected to be ASCII decimal digits.
    #[error("{field} is not a decimal field: {raw}")]
    InvalidDecimal {
        /// Field name.
        field: &'static str,
        /// Hex dump of the offending bytes.
        raw: String,
    },
    /// Field expected to be ASCII hex digits.
    #[error("{field} is not a hex field: {raw}")]
    InvalidHex {
        /// Field name.
        field: &'static str,
        /// Hex dump of the offending bytes.
        raw: String,
    },
}

/// Protocol-level failures after a frame decoded cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The unit rejected the command.
    #[error("device rejected command: {code}")]
    Nak {
        /// Mapped error code.
        code: NakCode,
    },
    /// Reply carried neither ACK nor NAK.
    #[error("unrecognized reply indicator {field}")]
    Unrecognized {
        /// Hex dump of the command field.
        field: String,
    },
    /// Acknowledged reply belongs to a different request.
    #[error("reply does not match request: expected prefix {expected}, got {found}")]
    UnexpectedReply {
        /// Expected echoed code.
        expected: String,
        /// Leading bytes actually received.
        found: String,
    },
    /// Acknowledged payload failed typed decoding.
    #[error("malformed reply payload: {0}")]
    Decode(#[from] DecodeError),
}

/// Decoded reply data.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Acknowledgement without data.
    Empty,
    /// Device status.
    Status(StatusSnapshot),
    /// Version triplet.
    Version(FirmwareVersion),
    /// Echoed position of one axis.
    Position(u16),
    /// Echoed positions of both axes.
    DualPosition {
        /// Pan position.
        pan: u16,
        /// Tilt magnitude.
        tilt: u16,
    },
    /// Verbatim bytes.
    Raw(Vec<u8>),
}

/// Classify `frame` as the reply to `descriptor` and decode its payload.
pub fn interpret(descriptor: &CommandDescriptor, frame: &Frame) -> Result<Reply, ProtocolError> {
    match classify(frame) {
        Response::Ack { payload } => {
            let prefix = descriptor.reply_prefix();
            let Some(data) = payload.strip_prefix(prefix) else {
                let found = &payload[..payload.len().min(prefix.len())];
                return Err(ProtocolError::UnexpectedReply {
                    expected: descriptor.code.as_str().to_owned(),
                    found: String::from_utf8_lossy(found).into_owned(),
                });
            };
            Ok(decode_reply(descriptor.reply, data)?)
        }
        Response::Nak { code } => Err(ProtocolError::Nak { code }),
        Response::Unrecognized { field } => Err(ProtocolError::Unrecognized {
            field: hex_dump(&field),
        }),
    }
}

/// Run the decoder selected by `kind`.
pub fn decode_reply(kind: ReplyKind, data: &[u8]) -> Result<Reply, DecodeError> {
    Ok(match kind {
        ReplyKind::Empty => Reply::Empty,
        ReplyKind::Status => Reply::Status(decode_status(data)?),
        ReplyKind::Version => Reply::Version(decode_version(data)?),
        ReplyKind::Position => Reply::Position(decode_position(data)?),
        ReplyKind::DualPosition => {
            require_len("dual position", data, POSITION_DIGITS * 2)?;
            Reply::DualPosition {
                pan: parse_decimal("pan position", &data[..3])?,
                tilt: parse_decimal("tilt position", &data[3..6])?,
            }
        }
        ReplyKind::Raw => Reply::Raw(data.to_vec()),
    })
}

/// Decode a status payload.
pub fn decode_status(data: &[u8]) -> Result<StatusSnapshot, DecodeError> {
    require_len("status", data, STATUS_PAYLOAD_LEN)?;
    let capability_bits = data[0];
    let error_bits = data[1];
    let environment = data[2];
    let temperature_nibble = i16::from(environment & 0x0F);
    let humidity_nibble = u16::from(environment >> 4);
    Ok(StatusSnapshot {
        pan_supported: capability_bits & PAN_SUPPORTED_BIT != 0,
        tilt_supported: capability_bits & TILT_SUPPORTED_BIT != 0,
        error_present: error_bits & ERROR_PRESENT_BIT != 0,
        temperature_c: temperature_nibble * 5 - 5,
        humidity_pct: (humidity_nibble * 100 / 16) as u8,
        pan_position: parse_decimal("pan position", &data[3..6])?,
        tilt_position: parse_decimal("tilt position", &data[6..9])?,
        capability_bits,
        error_bits,
        captured_at: Utc::now(),
    })
}

/// Decode a six hex-digit version payload.
pub fn decode_version(data: &[u8]) -> Result<FirmwareVersion, DecodeError> {
    require_len("version", data, VERSION_PAYLOAD_LEN)?;
    let digits = &data[..VERSION_PAYLOAD_LEN];
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(DecodeError::InvalidHex {
            field: "version",
            raw: hex_dump(digits),
        });
    }
    let pair = |idx: usize| String::from_utf8_lossy(&digits[idx..idx + 2]).into_owned();
    Ok(FirmwareVersion {
        major: pair(0),
        minor: pair(2),
        revision: pair(4),
    })
}

/// Decode a 3-digit echoed position.
pub fn decode_position(data: &[u8]) -> Result<u16, DecodeError> {
    require_len("position", data, POSITION_DIGITS)?;
    parse_decimal("position", &data[..POSITION_DIGITS])
}

fn require_len(kind: &'static str, data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::TooShort {
            kind,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn parse_decimal(field: &'static str, digits: &[u8]) -> Result<u16, DecodeError> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(DecodeError::InvalidDecimal {
            field,
            raw: hex_dump(digits),
        });
    }
    Ok(digits
        .iter()
        .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::CommandCode;
    use crate::CONTROLLER_ID;

    fn reply(command: u8, payload: &[u8]) -> Frame {
        Frame::new(CONTROLLER_ID, 0x03, vec![command], payload).expect("frame")
    }

    #[test]
    fn status_payload_decodes_flags_and_positions() {
        let status = decode_status(&[0x18, 0x00, 0x01, b'0', b'5', b'0', b'0', b'3', b'0'])
            .expect("status decodes");
        assert!(status.pan_supported);
        assert!(status.tilt_supported);
        assert!(!status.error_present);
        assert_eq!(status.pan_position, 50);
        assert_eq!(status.tilt_position, 30);
        assert_eq!(status.temperature_c, 0);
        assert_eq!(status.humidity_pct, 0);
    }

    #[test]
    fn status_environment_and_error_bits() {
        let status = decode_status(&[0x08, 0x20, 0x85, b'1', b'8', b'0', b'0', b'9', b'0'])
            .expect("status decodes");
        assert!(status.pan_supported);
        assert!(!status.tilt_supported);
        assert!(status.error_present);
        assert_eq!(status.temperature_c, 20);
        assert_eq!(status.humidity_pct, 50);
        assert_eq!(status.pan_position, 180);
        assert_eq!(status.tilt_position, 90);
    }

    #[test]
    fn short_status_is_rejected() {
        let err = decode_status(&[0x18, 0x00, 0x01, b'0', b'5', b'0', b'0', b'3'])
            .expect_err("8 bytes is not enough");
        assert_eq!(
            err,
            DecodeError::TooShort {
                kind: "status",
                expected: 9,
                actual: 8
            }
        );
    }

    #[test]
    fn non_digit_position_is_rejected() {
        assert!(matches!(
            decode_position(b"0x5"),
            Err(DecodeError::InvalidDecimal { .. })
        ));
        assert_eq!(decode_position(b"340"), Ok(340));
    }

    #[test]
    fn version_pairs_become_components() {
        let version = decode_version(b"01020A").expect("version");
        assert_eq!(version.to_string(), "01.02.0A");
        assert!(matches!(
            decode_version(b"01.2.3"),
            Err(DecodeError::InvalidHex { .. })
        ));
    }

    #[test]
    fn nak_codes_map_to_reasons() {
        assert_eq!(NakCode::from_byte(0x10).reason(), "command not recognized");
        assert_eq!(NakCode::from_byte(0x04).reason(), "device already controlled");
        assert_eq!(NakCode::from_byte(0x08).reason(), "command unsupported by device");
        assert_eq!(NakCode::from_byte(0x20).reason(), "device timeout");
        let unknown = NakCode::from_byte(0x7F);
        assert_eq!(unknown, NakCode::Unknown(0x7F));
        assert_eq!(unknown.reason(), "unknown device error");
        assert_eq!(unknown.code(), 0x7F);
    }

    #[test]
    fn classify_distinguishes_ack_nak_and_garbage() {
        assert_eq!(
            classify(&reply(ACK, b"PP010")),
            Response::Ack {
                payload: b"PP010".to_vec()
            }
        );
        assert_eq!(
            classify(&reply(NAK, &[0x10])),
            Response::Nak {
                code: NakCode::CommandNotRecognized
            }
        );
        assert_eq!(
            classify(&reply(NAK, &[0x7F])),
            Response::Nak {
                code: NakCode::Unknown(0x7F)
            }
        );
        assert!(matches!(
            classify(&reply(b'Q', &[])),
            Response::Unrecognized { .. }
        ));
    }

    #[test]
    fn interpret_checks_the_echoed_code() {
        let descriptor = CommandCode::PanPosition.descriptor();
        assert_eq!(
            interpret(descriptor, &reply(ACK, b"PP010")),
            Ok(Reply::Position(10))
        );
        assert!(matches!(
            interpret(descriptor, &reply(ACK, b"TP010")),
            Err(ProtocolError::UnexpectedReply { .. })
        ));
        assert_eq!(
            interpret(descriptor, &reply(NAK, &[0x10])),
            Err(ProtocolError::Nak {
                code: NakCode::CommandNotRecognized
            })
        );
    }

    #[test]
    fn interpret_surfaces_decode_failures() {
        let descriptor = CommandCode::Status.descriptor();
        assert!(matches!(
            interpret(descriptor, &reply(ACK, b"ST\x18\x00")),
            Err(ProtocolError::Decode(DecodeError::TooShort { .. }))
        ));
    }

    #[test]
    fn dual_position_and_raw_replies() {
        assert_eq!(
            decode_reply(ReplyKind::DualPosition, b"045030"),
            Ok(Reply::DualPosition { pan: 45, tilt: 30 })
        );
        assert_eq!(
            decode_reply(ReplyKind::Raw, &[0x01, 0x02]),
            Ok(Reply::Raw(vec![0x01, 0x02]))
        );
        assert_eq!(decode_reply(ReplyKind::Empty, b"junk"), Ok(Reply::Empty));
    }
}
