//! ---
//! oe10_section: "03-device-session"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Device session state machine and byte channel seam."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! Request/response state machine for one peripheral.
//!
//! Every operation encodes one request, writes it, waits for a reply addressed
//! to the controller and interprets it against the command catalogue. A silent
//! attempt is retransmitted once; a garbled reply is retransmitted once only
//! for idempotent commands.

use std::fmt;
use std::time::{Duration, Instant};

use oe10_common::config::{AppConfig, MAX_PERIPHERAL_ID, MIN_PERIPHERAL_ID};
use oe10_protocol::{
    decode, encode, hex_dump, interpret, Axis, CommandCode, Diagnostics, Direction,
    DriveDirection, FirmwareVersion, Frame, FrameAssembler, FramingError, Position,
    ProportionalDrive, ProtocolError, Reply, RequestArg, StatusSnapshot, VersionReport, CONTROLLER_ID,
};
use tracing::{debug, info, trace, warn};

use crate::channel::ByteChannel;
use crate::state::DeviceState;
use crate::{Result, SessionError};

/// Frames written per request before giving up.
pub const MAX_ATTEMPTS: u32 = 2;

/// Session parameters fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Address of the unit to drive.
    pub peripheral_id: u8,
    /// Per-attempt wait for a reply.
    pub read_timeout: Duration,
    /// How long a status reply is served from cache.
    pub status_cache: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peripheral_id: 0x03,
            read_timeout: Duration::from_millis(1000),
            status_cache: Duration::from_millis(500),
        }
    }
}

impl From<&AppConfig> for SessionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            peripheral_id: config.device.peripheral_id,
            read_timeout: config.link.read_timeout,
            status_cache: config.device.status_cache,
        }
    }
}

/// Whether the session still owns its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel held, operations allowed.
    Open,
    /// Channel released.
    Closed,
}

/// Progress of the most recent exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No exchange yet.
    Idle,
    /// Request being written.
    Sending,
    /// Waiting for the reply.
    AwaitingResponse,
    /// A reply frame was received.
    Settled,
    /// Every attempt went unanswered.
    TimedOut,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Sending => "sending",
            Phase::AwaitingResponse => "awaiting_response",
            Phase::Settled => "settled",
            Phase::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

/// Outcome of one read window.
#[derive(Debug)]
enum Awaited {
    Reply(Frame),
    Silence,
    Garbled(FramingError),
}

/// Session bound to one peripheral over one channel.
pub struct DeviceSession<C: ByteChannel> {
    channel: Option<C>,
    config: SessionConfig,
    state: DeviceState,
    phase: Phase,
}

impl<C: ByteChannel> fmt::Debug for DeviceSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("channel", &self.channel.as_ref().map(|channel| channel.name()))
            .field("config", &self.config)
            .field("state", &self.state)
            .field("phase", &self.phase)
            .finish()
    }
}

impl<C: ByteChannel> DeviceSession<C> {
    /// Take ownership of `channel` and address the configured peripheral.
    pub fn open(channel: C, config: SessionConfig) -> Result<Self> {
        validate_peripheral_id(config.peripheral_id)?;
        info!(
            channel = channel.name(),
            peripheral = config.peripheral_id,
            read_timeout_ms = config.read_timeout.as_millis() as u64,
            "device session opened"
        );
        Ok(Self {
            channel: Some(channel),
            config,
            state: DeviceState::new(config.peripheral_id),
            phase: Phase::Idle,
        })
    }

    /// Open or closed.
    pub fn state(&self) -> SessionState {
        if self.channel.is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    /// Phase of the most recent exchange.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Address frames are currently sent to.
    pub fn peripheral_id(&self) -> u8 {
        self.state.peripheral_id
    }

    /// Last position confirmed by the unit.
    pub fn cached_position(&self) -> Position {
        self.state.position()
    }

    /// Parameters the session was opened with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Device status, served from cache while younger than the validity window.
    pub fn query_status(&mut self) -> Result<StatusSnapshot> {
        self.ensure_open()?;
        if let Some(status) = self.state.fresh_status(self.config.status_cache) {
            debug!(peripheral = self.state.peripheral_id, "status served from cache");
            return Ok(status.clone());
        }
        match self.execute(CommandCode::Status, RequestArg::None)? {
            Reply::Status(status) => {
                self.state.store_status(status.clone());
                Ok(status)
            }
            other => Err(mismatched(CommandCode::Status, &other)),
        }
    }

    /// Move pan to `degrees`, wrapped into `[0, 360)`. Returns the confirmed angle.
    pub fn move_pan_to(&mut self, degrees: f64) -> Result<u16> {
        let target = normalize_pan(degrees)?;
        self.ensure_open()?;
        let echoed = self.position_reply(CommandCode::PanPosition, RequestArg::Position(target))?;
        self.state.set_pan(echoed);
        Ok(self.state.position().pan)
    }

    /// Move tilt to `degrees`, clamped into `[-90, 90]`. Returns the confirmed angle.
    pub fn move_tilt_to(&mut self, degrees: f64) -> Result<i16> {
        let target = clamp_tilt(degrees)?;
        self.ensure_open()?;
        let (code, sign) = if target < 0 {
            (CommandCode::TiltDown, -1)
        } else {
            (CommandCode::TiltPosition, 1)
        };
        let magnitude = target.unsigned_abs();
        let echoed = self.position_reply(code, RequestArg::Position(magnitude))?;
        self.state.set_tilt(signed_tilt(echoed, sign));
        Ok(self.state.position().tilt)
    }

    /// Start a jog of `axis` towards `direction`. Returns the confirmed position.
    pub fn jog(&mut self, axis: Axis, direction: Direction) -> Result<Position> {
        self.ensure_open()?;
        let code = match (axis, direction) {
            (Axis::Pan, Direction::Negative) => CommandCode::PanLeft,
            (Axis::Pan, Direction::Positive) => CommandCode::PanRight,
            (Axis::Tilt, Direction::Positive) => CommandCode::TiltUp,
            (Axis::Tilt, Direction::Negative) => CommandCode::TiltDown,
        };
        let echoed = self.position_reply(code, RequestArg::None)?;
        match (axis, direction) {
            (Axis::Pan, _) => self.state.set_pan(echoed),
            (Axis::Tilt, Direction::Positive) => self.state.set_tilt(signed_tilt(echoed, 1)),
            (Axis::Tilt, Direction::Negative) => self.state.set_tilt(signed_tilt(echoed, -1)),
        }
        Ok(self.state.position())
    }

    /// Stop motion on `axis`. Returns the confirmed position.
    pub fn stop(&mut self, axis: Axis) -> Result<Position> {
        self.ensure_open()?;
        match axis {
            Axis::Pan => {
                let echoed = self.position_reply(CommandCode::PanStop, RequestArg::None)?;
                self.state.set_pan(echoed);
            }
            Axis::Tilt => {
                let echoed = self.position_reply(CommandCode::TiltStop, RequestArg::None)?;
                let sign = if self.state.position().tilt < 0 { -1 } else { 1 };
                self.state.set_tilt(signed_tilt(echoed, sign));
            }
        }
        Ok(self.state.position())
    }

    /// Proportional speed drive. `Ok(false)` when the unit refused it.
    pub fn drive_proportional(
        &mut self,
        pan_direction: i32,
        tilt_direction: i32,
        pan_speed: i32,
        tilt_speed: i32,
    ) -> Result<bool> {
        self.ensure_open()?;
        let drive = ProportionalDrive::new(pan_direction, tilt_direction, pan_speed, tilt_speed);
        match self.execute(CommandCode::ProportionalControl, RequestArg::Drive(drive)) {
            Ok(_) => Ok(true),
            Err(SessionError::Protocol(ProtocolError::Nak { code })) => {
                warn!(%code, "proportional drive refused");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Proportional speed drive that adopts the positions echoed by the unit.
    pub fn drive_proportional_with_feedback(
        &mut self,
        pan_direction: i32,
        tilt_direction: i32,
        pan_speed: i32,
        tilt_speed: i32,
    ) -> Result<Position> {
        self.ensure_open()?;
        let drive = ProportionalDrive::new(pan_direction, tilt_direction, pan_speed, tilt_speed);
        let code = CommandCode::ProportionalFeedback;
        match self.execute(code, RequestArg::Drive(drive))? {
            Reply::DualPosition { pan, tilt } => {
                let sign = match drive.tilt {
                    DriveDirection::Positive => 1,
                    DriveDirection::Negative => -1,
                    DriveDirection::Stop if self.state.position().tilt < 0 => -1,
                    DriveDirection::Stop => 1,
                };
                self.state.set_pan(pan);
                self.state.set_tilt(signed_tilt(tilt, sign));
                Ok(self.state.position())
            }
            other => Err(mismatched(code, &other)),
        }
    }

    /// Protocol and software versions.
    pub fn query_versions(&mut self) -> Result<VersionReport> {
        self.ensure_open()?;
        let protocol = self.version_reply(CommandCode::ProtocolVersion)?;
        let software = self.version_reply(CommandCode::SoftwareVersion)?;
        Ok(VersionReport { protocol, software })
    }

    /// Give the unit a new address. Later frames go to `new_id`.
    pub fn reassign_peripheral_id(&mut self, new_id: u8) -> Result<()> {
        validate_peripheral_id(new_id)?;
        self.ensure_open()?;
        let old_id = self.state.peripheral_id;
        self.transact(
            CommandCode::SetPeripheralId,
            RequestArg::PeripheralId(new_id),
            &[old_id, new_id],
        )?;
        self.state.peripheral_id = new_id;
        self.config.peripheral_id = new_id;
        self.state.invalidate_status();
        info!(old = old_id, new = new_id, "peripheral re-addressed");
        Ok(())
    }

    /// Raw error diagnosis dump.
    pub fn diagnose(&mut self) -> Result<Diagnostics> {
        self.ensure_open()?;
        match self.execute(CommandCode::ErrorDiagnosis, RequestArg::None)? {
            Reply::Raw(raw) => Ok(Diagnostics::from_raw(raw)),
            other => Err(mismatched(CommandCode::ErrorDiagnosis, &other)),
        }
    }

    /// Release the channel. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut channel) = self.channel.take() else {
            return Ok(());
        };
        self.state.reset();
        self.phase = Phase::Idle;
        info!(channel = channel.name(), "device session closed");
        channel.close()?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.channel.is_none() {
            return Err(SessionError::SessionClosed);
        }
        Ok(())
    }

    fn position_reply(&mut self, code: CommandCode, arg: RequestArg) -> Result<u16> {
        match self.execute(code, arg)? {
            Reply::Position(position) => Ok(position),
            other => Err(mismatched(code, &other)),
        }
    }

    fn version_reply(&mut self, code: CommandCode) -> Result<FirmwareVersion> {
        match self.execute(code, RequestArg::None)? {
            Reply::Version(version) => Ok(version),
            other => Err(mismatched(code, &other)),
        }
    }

    fn execute(&mut self, code: CommandCode, arg: RequestArg) -> Result<Reply> {
        let peripheral = self.state.peripheral_id;
        self.transact(code, arg, &[peripheral])
    }

    /// One request with its retry policy; replies count only from `sources`.
    fn transact(&mut self, code: CommandCode, arg: RequestArg, sources: &[u8]) -> Result<Reply> {
        let descriptor = code.descriptor();
        let Some(payload) = descriptor.encode_payload(&arg) else {
            return Err(SessionError::InvalidArgument(format!(
                "{arg:?} is not an argument of {code}"
            )));
        };
        let request = encode(self.state.peripheral_id, CONTROLLER_ID, code.as_bytes(), &payload)?;
        let timeout = self.config.read_timeout;
        let Some(channel) = self.channel.as_mut() else {
            return Err(SessionError::SessionClosed);
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            discard_stale_input(channel, timeout)?;
            self.phase = Phase::Sending;
            debug!(
                operation = descriptor.operation,
                command = %code,
                attempt,
                peripheral = self.state.peripheral_id,
                "sending request"
            );
            trace!(tx = %hex_dump(&request));
            channel.write(&request)?;
            self.phase = Phase::AwaitingResponse;

            match await_reply(channel, timeout, sources)? {
                Awaited::Reply(frame) => {
                    self.phase = Phase::Settled;
                    return Ok(interpret(descriptor, &frame)?);
                }
                Awaited::Silence if attempt < MAX_ATTEMPTS => {
                    warn!(command = %code, attempt, "no reply, retransmitting");
                }
                Awaited::Silence => {
                    self.phase = Phase::TimedOut;
                    warn!(command = %code, attempts = attempt, "device timeout");
                    return Err(SessionError::DeviceTimeout {
                        command: code,
                        attempts: attempt,
                    });
                }
                Awaited::Garbled(err) if descriptor.idempotent && attempt < MAX_ATTEMPTS => {
                    warn!(command = %code, attempt, error = %err, "garbled reply, retransmitting");
                }
                Awaited::Garbled(err) => {
                    self.phase = Phase::Settled;
                    return Err(err.into());
                }
            }
        }
    }
}

impl<C: ByteChannel> Drop for DeviceSession<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "closing channel on drop failed");
        }
    }
}

/// Drain input left over from earlier exchanges, for at most `budget`.
fn discard_stale_input<C: ByteChannel>(channel: &mut C, budget: Duration) -> Result<()> {
    let deadline = Instant::now() + budget;
    let mut discarded = 0;
    while channel.bytes_available()? > 0 {
        if Instant::now() >= deadline {
            warn!(discarded, "input still arriving, transmitting anyway");
            break;
        }
        let stale = channel.read_available(Duration::ZERO)?;
        if stale.is_empty() {
            break;
        }
        discarded += stale.len();
    }
    if discarded > 0 {
        debug!(discarded, "discarded stale input before transmit");
    }
    Ok(())
}

/// Read until a frame from one of `sources` to the controller arrives or `timeout` elapses.
fn await_reply<C: ByteChannel>(channel: &mut C, timeout: Duration, sources: &[u8]) -> Result<Awaited> {
    let deadline = Instant::now() + timeout;
    let mut assembler = FrameAssembler::new();
    loop {
        while let Some(raw) = assembler.next_frame() {
            trace!(rx = %hex_dump(&raw));
            let frame = match decode(&raw) {
                Ok(frame) => frame,
                Err(err) => return Ok(Awaited::Garbled(err)),
            };
            if frame.destination() != CONTROLLER_ID || !sources.contains(&frame.source()) {
                debug!(
                    destination = frame.destination(),
                    source = frame.source(),
                    "skipping frame not addressed to the controller"
                );
                continue;
            }
            return Ok(Awaited::Reply(frame));
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let chunk = channel.read_available(deadline - now)?;
        if chunk.is_empty() {
            break;
        }
        assembler.push(&chunk);
    }

    if assembler.is_empty() {
        Ok(Awaited::Silence)
    } else {
        Ok(Awaited::Garbled(FramingError::Truncated {
            buffered: assembler.buffered(),
        }))
    }
}

fn signed_tilt(magnitude: u16, sign: i16) -> i16 {
    sign * magnitude.min(90) as i16
}

fn mismatched(code: CommandCode, reply: &Reply) -> SessionError {
    SessionError::Protocol(ProtocolError::UnexpectedReply {
        expected: code.as_str().to_owned(),
        found: format!("{reply:?}"),
    })
}

/// Wrap `degrees` into `[0, 360)` and round to a whole degree.
pub fn normalize_pan(degrees: f64) -> Result<u16> {
    if !degrees.is_finite() {
        return Err(SessionError::InvalidArgument(format!(
            "pan angle {degrees} is not finite"
        )));
    }
    Ok((degrees.rem_euclid(360.0).round() as u16) % 360)
}

/// Clamp `degrees` into `[-90, 90]` and round to a whole degree.
pub fn clamp_tilt(degrees: f64) -> Result<i16> {
    if !degrees.is_finite() {
        return Err(SessionError::InvalidArgument(format!(
            "tilt angle {degrees} is not finite"
        )));
    }
    Ok(degrees.clamp(-90.0, 90.0).round() as i16)
}

/// Reject addresses reserved for the controller and broadcast.
pub fn validate_peripheral_id(id: u8) -> Result<()> {
    if !(MIN_PERIPHERAL_ID..=MAX_PERIPHERAL_ID).contains(&id) {
        return Err(SessionError::InvalidArgument(format!(
            "peripheral id {id:#04x} outside {MIN_PERIPHERAL_ID:#04x}..={MAX_PERIPHERAL_ID:#04x}"
        )));
    }
    Ok(())
}
