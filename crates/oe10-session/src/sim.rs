//! ---
//! oe10_section: "03-device-session"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Device session state machine and byte channel seam."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! In-process stand-in for a pan/tilt unit, answering frames the way the
//! hardware does. Used by integration suites and `oe10ctl --simulate`.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use oe10_protocol::catalogue::encode_position;
use oe10_protocol::response::decode_position;
use oe10_protocol::{
    decode, CommandCode, Frame, FrameAssembler, Position, ACK, BROADCAST_ID, CONTROLLER_ID, NAK,
};
use parking_lot::Mutex;
use tracing::debug;

/// Degrees moved by one jog or one proportional step.
pub const JOG_STEP: u16 = 5;
/// Reply to `PV`.
pub const PROTOCOL_VERSION: &[u8] = b"010203";
/// Reply to `CV`.
pub const SOFTWARE_VERSION: &[u8] = b"020100";
/// Reply to `ED`.
pub const DIAGNOSTIC_TEXT: &[u8] = b"OK";

const NAK_NOT_RECOGNIZED: u8 = 0x10;

#[derive(Debug)]
struct SimState {
    peripheral_id: u8,
    pan: u16,
    tilt: i16,
    capability_bits: u8,
    error_bits: u8,
    environment: u8,
    inbox: FrameAssembler,
    outbox: VecDeque<u8>,
    requests: Vec<Frame>,
    drop_replies: u32,
    garble_replies: u32,
    nak_next: Option<u8>,
    local_echo: bool,
    closed: bool,
}

/// Simulated peripheral usable as a [`ByteChannel`](crate::ByteChannel).
///
/// Clones share the same unit, so one handle can drive a session while another
/// inspects or perturbs the device.
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedPeripheral {
    /// Unit answering on `peripheral_id`, both axes at zero, pan and tilt supported.
    pub fn new(peripheral_id: u8) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                peripheral_id,
                pan: 0,
                tilt: 0,
                capability_bits: 0x18,
                error_bits: 0x00,
                environment: 0x85,
                inbox: FrameAssembler::new(),
                outbox: VecDeque::new(),
                requests: Vec::new(),
                drop_replies: 0,
                garble_replies: 0,
                nak_next: None,
                local_echo: false,
                closed: false,
            })),
        }
    }

    /// Place the axes at `position`.
    pub fn with_position(self, position: Position) -> Self {
        {
            let mut state = self.inner.lock();
            state.pan = position.pan % 360;
            state.tilt = position.tilt.clamp(-90, 90);
        }
        self
    }

    /// Echo every written byte back before the reply, like a looped-back RS-232 pair.
    pub fn with_local_echo(self, enabled: bool) -> Self {
        self.inner.lock().local_echo = enabled;
        self
    }

    /// Swallow the next `count` replies.
    pub fn drop_next_replies(&self, count: u32) {
        self.inner.lock().drop_replies = count;
    }

    /// Corrupt the checksum of the next `count` replies.
    pub fn garble_next_replies(&self, count: u32) {
        self.inner.lock().garble_replies = count;
    }

    /// Reject the next request with `code`.
    pub fn nak_next(&self, code: u8) {
        self.inner.lock().nak_next = Some(code);
    }

    /// Raise or clear the error bit reported by `ST`.
    pub fn set_error_present(&self, present: bool) {
        self.inner.lock().error_bits = if present { 0x20 } else { 0x00 };
    }

    /// Replace the packed temperature/humidity byte reported by `ST`.
    pub fn set_environment(&self, environment: u8) {
        self.inner.lock().environment = environment;
    }

    /// Address the unit currently answers on.
    pub fn peripheral_id(&self) -> u8 {
        self.inner.lock().peripheral_id
    }

    /// Actual axis position of the unit.
    pub fn position(&self) -> Position {
        let state = self.inner.lock();
        Position {
            pan: state.pan,
            tilt: state.tilt,
        }
    }

    /// Requests addressed to this unit, in arrival order.
    pub fn requests(&self) -> Vec<Frame> {
        self.inner.lock().requests.clone()
    }

    /// Command codes of the requests received so far.
    pub fn request_codes(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|frame| String::from_utf8_lossy(frame.command()).into_owned())
            .collect()
    }
}

impl SimState {
    fn receive(&mut self, bytes: &[u8]) {
        if self.local_echo {
            self.outbox.extend(bytes);
        }
        self.inbox.push(bytes);
        while let Some(raw) = self.inbox.next_frame() {
            let frame = match decode(&raw) {
                Ok(frame) => frame,
                Err(err) => {
                    debug!(error = %err, "simulated unit ignored malformed frame");
                    continue;
                }
            };
            if frame.destination() != self.peripheral_id && frame.destination() != BROADCAST_ID {
                continue;
            }
            self.requests.push(frame.clone());
            if self.drop_replies > 0 {
                self.drop_replies -= 1;
                debug!("simulated unit dropped reply");
                continue;
            }
            let (command, payload) = match self.nak_next.take() {
                Some(code) => (NAK, vec![code]),
                None => self.handle(&frame),
            };
            self.reply(command, payload);
        }
    }

    fn reply(&mut self, command: u8, payload: Vec<u8>) {
        let Ok(frame) = Frame::new(CONTROLLER_ID, self.peripheral_id, vec![command], payload) else {
            return;
        };
        let mut bytes = frame.to_bytes();
        if self.garble_replies > 0 {
            self.garble_replies -= 1;
            let checksum_at = bytes.len() - 4;
            bytes[checksum_at] ^= 0x5A;
        }
        self.outbox.extend(bytes);
    }

    fn handle(&mut self, frame: &Frame) -> (u8, Vec<u8>) {
        let Some(code) = std::str::from_utf8(frame.command())
            .ok()
            .and_then(|text| text.parse::<CommandCode>().ok())
        else {
            return (NAK, vec![NAK_NOT_RECOGNIZED]);
        };
        if !code.descriptor().payload.accepts(frame.payload()) {
            return (NAK, vec![NAK_NOT_RECOGNIZED]);
        }
        let data = match code {
            CommandCode::Status => {
                let mut data = vec![self.capability_bits, self.error_bits, self.environment];
                data.extend(encode_position(self.pan));
                data.extend(encode_position(self.tilt.unsigned_abs()));
                data
            }
            CommandCode::ProtocolVersion => PROTOCOL_VERSION.to_vec(),
            CommandCode::SoftwareVersion => SOFTWARE_VERSION.to_vec(),
            CommandCode::PanPosition => {
                let Ok(target) = decode_position(frame.payload()) else {
                    return (NAK, vec![NAK_NOT_RECOGNIZED]);
                };
                self.pan = target % 360;
                encode_position(self.pan)
            }
            CommandCode::TiltPosition | CommandCode::TiltDown if !frame.payload().is_empty() => {
                let Ok(magnitude) = decode_position(frame.payload()) else {
                    return (NAK, vec![NAK_NOT_RECOGNIZED]);
                };
                let magnitude = magnitude.min(90) as i16;
                self.tilt = if code == CommandCode::TiltDown {
                    -magnitude
                } else {
                    magnitude
                };
                encode_position(self.tilt.unsigned_abs())
            }
            CommandCode::PanLeft => {
                self.step_pan(-1);
                encode_position(self.pan)
            }
            CommandCode::PanRight => {
                self.step_pan(1);
                encode_position(self.pan)
            }
            CommandCode::PanStop => encode_position(self.pan),
            CommandCode::TiltUp => {
                self.step_tilt(1);
                encode_position(self.tilt.unsigned_abs())
            }
            CommandCode::TiltDown => {
                self.step_tilt(-1);
                encode_position(self.tilt.unsigned_abs())
            }
            CommandCode::TiltStop => encode_position(self.tilt.unsigned_abs()),
            CommandCode::ProportionalControl | CommandCode::ProportionalFeedback => {
                let &[direction, pan_speed, tilt_speed, _] = frame.payload() else {
                    return (NAK, vec![NAK_NOT_RECOGNIZED]);
                };
                self.apply_drive(direction, pan_speed, tilt_speed);
                if code == CommandCode::ProportionalFeedback {
                    let mut data = encode_position(self.pan);
                    data.extend(encode_position(self.tilt.unsigned_abs()));
                    data
                } else {
                    Vec::new()
                }
            }
            CommandCode::SetPeripheralId => {
                let text = String::from_utf8_lossy(frame.payload()).into_owned();
                let Ok(new_id) = u8::from_str_radix(&text, 16) else {
                    return (NAK, vec![NAK_NOT_RECOGNIZED]);
                };
                debug!(old = self.peripheral_id, new = new_id, "simulated unit re-addressed");
                self.peripheral_id = new_id;
                Vec::new()
            }
            CommandCode::ErrorDiagnosis => DIAGNOSTIC_TEXT.to_vec(),
            // Only reachable with an empty payload, handled by the jog arm above.
            CommandCode::TiltPosition => return (NAK, vec![NAK_NOT_RECOGNIZED]),
        };
        let mut payload = code.as_bytes().to_vec();
        payload.extend(data);
        (ACK, payload)
    }

    fn step_pan(&mut self, sign: i32) {
        let next = i32::from(self.pan) + sign * i32::from(JOG_STEP);
        self.pan = next.rem_euclid(360) as u16;
    }

    fn step_tilt(&mut self, sign: i16) {
        self.tilt = (self.tilt + sign * JOG_STEP as i16).clamp(-90, 90);
    }

    fn apply_drive(&mut self, direction: u8, pan_speed: u8, tilt_speed: u8) {
        let sign = |bits: u8| match bits & 0b11 {
            0b01 => 1,
            0b10 => -1,
            _ => 0,
        };
        if pan_speed > 0 {
            self.step_pan(sign(direction));
        }
        if tilt_speed > 0 {
            self.step_tilt(sign(direction >> 2) as i16);
        }
    }
}

impl crate::ByteChannel for SimulatedPeripheral {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "simulated unit closed"));
        }
        state.receive(bytes);
        Ok(())
    }

    fn read_available(&mut self, _max_wait: Duration) -> io::Result<Vec<u8>> {
        Ok(self.inner.lock().outbox.drain(..).collect())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.inner.lock().outbox.len())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.inner.lock();
        state.closed = true;
        state.outbox.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ByteChannel;
    use oe10_protocol::{classify, encode, Response};

    fn exchange(unit: &mut SimulatedPeripheral, code: &[u8], payload: &[u8]) -> Response {
        let request = encode(0x03, CONTROLLER_ID, code, payload).expect("encode");
        unit.write(&request).expect("write");
        let reply = unit.read_available(Duration::ZERO).expect("read");
        classify(&decode(&reply).expect("reply decodes"))
    }

    #[test]
    fn status_reports_position_and_flags() {
        let mut unit = SimulatedPeripheral::new(0x03).with_position(Position { pan: 50, tilt: -30 });
        let Response::Ack { payload } = exchange(&mut unit, b"ST", &[]) else {
            panic!("expected ack");
        };
        assert_eq!(&payload[..5], &[b'S', b'T', 0x18, 0x00, 0x85]);
        assert_eq!(&payload[5..], b"050030");
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut unit = SimulatedPeripheral::new(0x03);
        assert_eq!(
            exchange(&mut unit, b"ZZ", &[]),
            Response::Nak {
                code: oe10_protocol::NakCode::CommandNotRecognized
            }
        );
    }

    #[test]
    fn absolute_moves_and_jogs_track_position() {
        let mut unit = SimulatedPeripheral::new(0x03);
        exchange(&mut unit, b"PP", b"355");
        exchange(&mut unit, b"PR", &[]);
        exchange(&mut unit, b"TD", b"020");
        exchange(&mut unit, b"TU", &[]);
        assert_eq!(unit.position(), Position { pan: 0, tilt: -15 });
        assert_eq!(unit.request_codes(), vec!["PP", "PR", "TD", "TU"]);
    }

    #[test]
    fn frames_for_other_units_are_ignored() {
        let mut unit = SimulatedPeripheral::new(0x04);
        let request = encode(0x03, CONTROLLER_ID, b"ST", &[]).expect("encode");
        unit.write(&request).expect("write");
        assert_eq!(unit.bytes_available().expect("available"), 0);
        assert!(unit.requests().is_empty());
    }

    #[test]
    fn local_echo_precedes_reply() {
        let mut unit = SimulatedPeripheral::new(0x03).with_local_echo(true);
        let request = encode(0x03, CONTROLLER_ID, b"ED", &[]).expect("encode");
        unit.write(&request).expect("write");
        let bytes = unit.read_available(Duration::ZERO).expect("read");
        assert_eq!(&bytes[..request.len()], request.as_slice());
        let reply = decode(&bytes[request.len()..]).expect("reply decodes");
        assert_eq!(reply.payload(), b"EDOK");
    }
}
