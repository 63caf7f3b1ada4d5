//! ---
//! oe10_section: "02-protocol-framing"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "OE10-104 framing, checksum and response decoding."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! Frame codec for the bracketed wire format.
//!
//! ```text
//! +---+----+---+-----+---+-----+---+-----+---+------+---+----+---+------+---+
//! | < | DST| : | SRC | : | LEN | : | CMD | : | DATA | : | CK | : | KIND | > |
//! +---+----+---+-----+---+-----+---+-----+---+------+---+----+---+------+---+
//! ```
//!
//! `DST`, `SRC`, `LEN` and `CK` are single raw bytes. `LEN` counts
//! `CMD : DATA` (the separator after the command is always present). The
//! checksum covers everything from `DST` through `DATA`.

use bytes::{Buf, BytesMut};
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

use crate::checksum::{self, Checksum, ChecksumIndicator};
use crate::{END_MARKER, SEPARATOR, START_MARKER};

/// Bytes preceding the command field: `< D : S : L :`.
pub const HEADER_LEN: usize = 7;
/// Bytes following the payload: `: CK : KIND >`.
pub const TRAILER_LEN: usize = 5;
/// Total frame length is the declared length plus this overhead.
pub const FRAME_OVERHEAD: usize = HEADER_LEN + TRAILER_LEN;
/// Shortest decodable frame: one command byte and its separator.
pub const MIN_FRAME_LEN: usize = FRAME_OVERHEAD + 2;

/// Reasons a byte sequence is not a well-formed frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Fewer bytes than the smallest possible frame.
    #[error("frame too short: {len} bytes")]
    TooShort {
        /// Number of bytes received.
        len: usize,
    },
    /// First byte is not the start marker.
    #[error("missing start marker, found {found:#04x}")]
    MissingStartMarker {
        /// Byte found in the start position.
        found: u8,
    },
    /// Last byte is not the end marker.
    #[error("missing end marker, found {found:#04x}")]
    MissingEndMarker {
        /// Byte found in the end position.
        found: u8,
    },
    /// A fixed-position field separator is absent.
    #[error("missing field separator at offset {offset}")]
    MissingSeparator {
        /// Offset where the separator was expected.
        offset: usize,
    },
    /// Declared length disagrees with the content between header and trailer.
    #[error("declared length {declared} does not match content length {actual}")]
    LengthMismatch {
        /// Value of the length field.
        declared: usize,
        /// Bytes actually present.
        actual: usize,
    },
    /// Command field is empty or contains the separator.
    #[error("invalid command field")]
    InvalidCommand,
    /// Command and payload do not fit the one-byte length field.
    #[error("frame content of {len} bytes exceeds the length field")]
    ContentTooLong {
        /// Content length that was requested.
        len: usize,
    },
    /// Checksum indicator is not one of the known tags.
    #[error("unknown checksum indicator {found:#04x}")]
    InvalidIndicator {
        /// Byte found in the indicator position.
        found: u8,
    },
    /// Recomputed checksum does not match the received one.
    #[error("checksum mismatch: expected {expected}, received {received}")]
    ChecksumMismatch {
        /// Checksum recomputed over the received header.
        expected: Checksum,
        /// Checksum carried by the frame.
        received: Checksum,
    },
    /// Read window closed with a partial frame buffered.
    #[error("truncated frame: {buffered} bytes buffered when the read window closed")]
    Truncated {
        /// Bytes buffered at the time of the timeout.
        buffered: usize,
    },
}

/// A single decoded or outbound protocol message.
///
/// Only [`Frame::new`] and [`decode`] build frames, so the length field and
/// checksum always agree with the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    destination: u8,
    source: u8,
    command: Vec<u8>,
    payload: Vec<u8>,
    checksum: Checksum,
}

impl Frame {
    /// Build a frame and compute its checksum.
    pub fn new(
        destination: u8,
        source: u8,
        command: impl Into<Vec<u8>>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, FramingError> {
        let command = command.into();
        let payload = payload.into();
        if command.is_empty() || command.contains(&SEPARATOR) {
            return Err(FramingError::InvalidCommand);
        }
        let len = content_len(&command, &payload);
        if len > usize::from(u8::MAX) {
            return Err(FramingError::ContentTooLong { len });
        }
        let checksum = checksum::compute(&header_bytes(
            destination,
            source,
            len as u8,
            &command,
            &payload,
        ));
        Ok(Self {
            destination,
            source,
            command,
            payload,
            checksum,
        })
    }

    /// Addressee of the frame.
    pub fn destination(&self) -> u8 {
        self.destination
    }

    /// Sender of the frame.
    pub fn source(&self) -> u8 {
        self.source
    }

    /// Two ASCII characters on requests, the ACK/NAK byte on replies.
    pub fn command(&self) -> &[u8] {
        &self.command
    }

    /// Command-specific data, possibly empty.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Checksum carried by the frame.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Value of the length field for this frame.
    pub fn declared_len(&self) -> u8 {
        // Bounded by the check in `new` and by `decode`.
        content_len(&self.command, &self.payload) as u8
    }

    /// Serialise the frame including markers.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = header_bytes(
            self.destination,
            self.source,
            self.declared_len(),
            &self.command,
            &self.payload,
        );
        let mut out = Vec::with_capacity(header.len() + TRAILER_LEN + 2);
        out.push(START_MARKER);
        out.extend_from_slice(&header);
        out.push(SEPARATOR);
        out.push(self.checksum.value);
        out.push(SEPARATOR);
        out.push(self.checksum.indicator.as_byte());
        out.push(END_MARKER);
        out
    }
}

fn content_len(command: &[u8], payload: &[u8]) -> usize {
    command.len() + 1 + payload.len()
}

fn header_bytes(destination: u8, source: u8, len: u8, command: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut header = Vec::with_capacity(6 + command.len() + 1 + payload.len());
    header.extend_from_slice(&[destination, SEPARATOR, source, SEPARATOR, len, SEPARATOR]);
    header.extend_from_slice(command);
    header.push(SEPARATOR);
    header.extend_from_slice(payload);
    header
}

/// Encode a request frame into wire bytes.
pub fn encode(
    destination: u8,
    source: u8,
    command: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>, FramingError> {
    Ok(Frame::new(destination, source, command, payload)?.to_bytes())
}

/// Decode wire bytes into a frame. Any defect rejects the whole frame.
pub fn decode(bytes: &[u8]) -> Result<Frame, FramingError> {
    let len = bytes.len();
    if len < MIN_FRAME_LEN {
        return Err(FramingError::TooShort { len });
    }
    if bytes[0] != START_MARKER {
        return Err(FramingError::MissingStartMarker { found: bytes[0] });
    }
    if bytes[len - 1] != END_MARKER {
        return Err(FramingError::MissingEndMarker {
            found: bytes[len - 1],
        });
    }
    for offset in [2, 4, 6, len - TRAILER_LEN, len - 3] {
        if bytes[offset] != SEPARATOR {
            return Err(FramingError::MissingSeparator { offset });
        }
    }

    let destination = bytes[1];
    let source = bytes[3];
    let declared = usize::from(bytes[5]);
    let content = &bytes[HEADER_LEN..len - TRAILER_LEN];
    if content.len() != declared {
        return Err(FramingError::LengthMismatch {
            declared,
            actual: content.len(),
        });
    }

    let split = content
        .iter()
        .position(|byte| *byte == SEPARATOR)
        .ok_or(FramingError::MissingSeparator {
            offset: HEADER_LEN + content.len(),
        })?;
    if split == 0 {
        return Err(FramingError::InvalidCommand);
    }
    let command = content[..split].to_vec();
    let payload = content[split + 1..].to_vec();

    let indicator_byte = bytes[len - 2];
    let indicator = ChecksumIndicator::from_byte(indicator_byte).ok_or(
        FramingError::InvalidIndicator {
            found: indicator_byte,
        },
    )?;
    let received = Checksum {
        value: bytes[len - 4],
        indicator,
    };
    let expected = checksum::compute(&bytes[1..len - TRAILER_LEN]);
    if expected != received {
        return Err(FramingError::ChecksumMismatch { expected, received });
    }

    Ok(Frame {
        destination,
        source,
        command,
        payload,
        checksum: received,
    })
}

/// Space separated upper-case hex, as printed in link captures.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Accumulates channel reads and cuts them into candidate frames.
///
/// Frame boundaries come from the length byte rather than a scan for the end
/// marker, so payload bytes equal to a marker do not split a frame.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
    discarded: usize,
}

impl FrameAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete candidate frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            while !self.buffer.is_empty() && self.buffer[0] != START_MARKER {
                self.buffer.advance(1);
                self.discarded += 1;
            }
            if self.buffer.len() < HEADER_LEN {
                return None;
            }
            let header_ok = [2, 4, 6]
                .iter()
                .all(|offset| self.buffer[*offset] == SEPARATOR);
            if !header_ok {
                // Stray start marker; resynchronise on the next one.
                trace!(discarded = self.discarded, "stray start marker dropped");
                self.buffer.advance(1);
                self.discarded += 1;
                continue;
            }
            let total = usize::from(self.buffer[5]) + FRAME_OVERHEAD;
            if self.buffer.len() < total {
                return None;
            }
            return Some(self.buffer.split_to(total).to_vec());
        }
    }

    /// Number of bytes buffered but not yet returned.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes dropped while searching for a frame start.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
