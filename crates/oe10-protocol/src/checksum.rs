//! ---
//! oe10_section: "02-protocol-framing"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "OE10-104 framing, checksum and response decoding."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! XOR checksum with marker substitution.
//!
//! A receiver scans for [`START_MARKER`] and [`END_MARKER`] to find frame
//! boundaries, so the checksum byte may never carry either value. Collisions are
//! replaced by a fixed substitute and flagged through the indicator byte.

use std::fmt;

use serde::Serialize;

use crate::{END_MARKER, START_MARKER};

/// Value transmitted in place of a checksum that collided with the start marker.
pub const START_SUBSTITUTE: u8 = 0x00;
/// Value transmitted in place of a checksum that collided with the end marker.
pub const END_SUBSTITUTE: u8 = 0x01;

/// Tag byte transmitted after the checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChecksumIndicator {
    /// Raw checksum equalled the start marker and was substituted.
    SubstitutedStart,
    /// Raw checksum equalled the end marker and was substituted.
    SubstitutedEnd,
    /// Checksum is the literal XOR value.
    Generic,
}

impl ChecksumIndicator {
    /// Wire representation of the indicator.
    pub const fn as_byte(self) -> u8 {
        match self {
            ChecksumIndicator::SubstitutedStart => b'0',
            ChecksumIndicator::SubstitutedEnd => b'1',
            ChecksumIndicator::Generic => b'G',
        }
    }

    /// Parse the wire representation, `None` for unknown tags.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(ChecksumIndicator::SubstitutedStart),
            b'1' => Some(ChecksumIndicator::SubstitutedEnd),
            b'G' => Some(ChecksumIndicator::Generic),
            _ => None,
        }
    }
}

/// Checksum value paired with its indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Checksum {
    /// Byte transmitted in the checksum field.
    pub value: u8,
    /// How `value` relates to the raw XOR.
    pub indicator: ChecksumIndicator,
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}/{}", self.value, self.indicator.as_byte() as char)
    }
}

/// XOR-reduce `bytes` and apply the marker substitution.
pub fn compute(bytes: &[u8]) -> Checksum {
    let raw = bytes.iter().fold(0u8, |acc, byte| acc ^ byte);
    match raw {
        START_MARKER => Checksum {
            value: START_SUBSTITUTE,
            indicator: ChecksumIndicator::SubstitutedStart,
        },
        END_MARKER => Checksum {
            value: END_SUBSTITUTE,
            indicator: ChecksumIndicator::SubstitutedEnd,
        },
        value => Checksum {
            value,
            indicator: ChecksumIndicator::Generic,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_checksum_for_status_header() {
        let header = [0x03, b':', 0x01, b':', 0x03, b':', b'S', b'T', b':'];
        let checksum = compute(&header);
        assert_eq!(checksum.value, 0x06);
        assert_eq!(checksum.indicator, ChecksumIndicator::Generic);
    }

    #[test]
    fn start_marker_collision_is_substituted() {
        let checksum = compute(&[0x30, 0x0C]);
        assert_eq!(checksum.value, START_SUBSTITUTE);
        assert_eq!(checksum.indicator, ChecksumIndicator::SubstitutedStart);
    }

    #[test]
    fn end_marker_collision_is_substituted() {
        let checksum = compute(&[END_MARKER]);
        assert_eq!(checksum.value, END_SUBSTITUTE);
        assert_eq!(checksum.indicator, ChecksumIndicator::SubstitutedEnd);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(
            compute(&[]),
            Checksum {
                value: 0,
                indicator: ChecksumIndicator::Generic
            }
        );
    }

    #[test]
    fn value_never_equals_a_marker() {
        for a in 0..=u8::MAX {
            for b in [0x00u8, 0x3A, 0x7F, 0xFF] {
                let input = [a, b, a.wrapping_mul(7)];
                let first = compute(&input);
                assert_eq!(first, compute(&input));
                assert_ne!(first.value, START_MARKER);
                assert_ne!(first.value, END_MARKER);
            }
        }
    }

    #[test]
    fn indicator_bytes_roundtrip() {
        for indicator in [
            ChecksumIndicator::SubstitutedStart,
            ChecksumIndicator::SubstitutedEnd,
            ChecksumIndicator::Generic,
        ] {
            assert_eq!(
                ChecksumIndicator::from_byte(indicator.as_byte()),
                Some(indicator)
            );
        }
        assert_eq!(ChecksumIndicator::from_byte(b'X'), None);
    }
}
