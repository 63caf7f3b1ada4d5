//! ---
//! oe10_section: "03-device-session"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Device session state machine and byte channel seam."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! Semantic operations on one OE10-104 peripheral over any [`ByteChannel`].
#![warn(missing_docs)]

use std::io;

use oe10_protocol::{CommandCode, FramingError, NakCode, ProtocolError};
use thiserror::Error;

pub mod channel;
pub mod session;
pub mod shared;
pub mod sim;
pub mod state;

pub use channel::{ByteChannel, ScriptStep, ScriptedChannel};
pub use session::{
    clamp_tilt, normalize_pan, validate_peripheral_id, DeviceSession, Phase, SessionConfig,
    SessionState, MAX_ATTEMPTS,
};
pub use shared::SharedSession;
pub use sim::SimulatedPeripheral;
pub use state::DeviceState;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The byte channel could not be opened or configured.
    #[error("connection failed: {0}")]
    Connection(String),
    /// A reply arrived but was not a well-formed frame.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    /// No reply after every permitted attempt.
    #[error("device did not answer {command} after {attempts} attempts")]
    DeviceTimeout {
        /// Command that went unanswered.
        command: CommandCode,
        /// Frames written for it.
        attempts: u32,
    },
    /// The unit answered but the answer was an error or unusable.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Caller input rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation attempted after `close`.
    #[error("session is closed")]
    SessionClosed,
    /// Channel read or write failed.
    #[error("channel i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// NAK code when the unit rejected the command.
    pub fn nak_code(&self) -> Option<NakCode> {
        match self {
            SessionError::Protocol(ProtocolError::Nak { code }) => Some(*code),
            _ => None,
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
