//! ---
//! oe10_section: "03-device-session"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Device session state machine and byte channel seam."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use oe10_protocol::{Position, StatusSnapshot, BROADCAST_ID, CONTROLLER_ID};

/// Host-side view of the peripheral, updated only from acknowledged replies.
#[derive(Debug, Clone)]
pub struct DeviceState {
    /// Address of this host.
    pub controller_id: u8,
    /// Address of the unit being driven.
    pub peripheral_id: u8,
    /// Address every unit listens to.
    pub broadcast_id: u8,
    position: Position,
    last_status: Option<(StatusSnapshot, Instant)>,
}

impl DeviceState {
    /// Fresh state for `peripheral_id` with unknown position.
    pub fn new(peripheral_id: u8) -> Self {
        Self {
            controller_id: CONTROLLER_ID,
            peripheral_id,
            broadcast_id: BROADCAST_ID,
            position: Position::default(),
            last_status: None,
        }
    }

    /// Last confirmed position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Record a confirmed pan angle.
    pub fn set_pan(&mut self, pan: u16) {
        self.position.pan = pan % 360;
    }

    /// Record a confirmed tilt angle.
    pub fn set_tilt(&mut self, tilt: i16) {
        self.position.tilt = tilt.clamp(-90, 90);
    }

    /// Cached status if it was captured less than `window` ago.
    pub fn fresh_status(&self, window: Duration) -> Option<&StatusSnapshot> {
        self.last_status
            .as_ref()
            .filter(|(_, captured)| captured.elapsed() < window)
            .map(|(status, _)| status)
    }

    /// Remember `status` as captured now.
    pub fn store_status(&mut self, status: StatusSnapshot) {
        self.last_status = Some((status, Instant::now()));
    }

    /// Forget the cached status.
    pub fn invalidate_status(&mut self) {
        self.last_status = None;
    }

    /// Drop everything learned from the unit.
    pub fn reset(&mut self) {
        self.position = Position::default();
        self.last_status = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            pan_supported: true,
            tilt_supported: true,
            error_present: false,
            temperature_c: 20,
            humidity_pct: 50,
            pan_position: 10,
            tilt_position: 5,
            capability_bits: 0x18,
            error_bits: 0,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn status_expires_after_window() {
        let mut state = DeviceState::new(0x03);
        assert!(state.fresh_status(Duration::from_secs(60)).is_none());
        state.store_status(snapshot());
        assert!(state.fresh_status(Duration::from_secs(60)).is_some());
        assert!(state.fresh_status(Duration::ZERO).is_none());
    }

    #[test]
    fn positions_stay_in_range() {
        let mut state = DeviceState::new(0x03);
        state.set_pan(360);
        state.set_tilt(-120);
        assert_eq!(state.position(), Position { pan: 0, tilt: -90 });
        state.store_status(snapshot());
        state.reset();
        assert_eq!(state.position(), Position::default());
        assert!(state.fresh_status(Duration::from_secs(60)).is_none());
        assert_eq!(state.controller_id, CONTROLLER_ID);
        assert_eq!(state.broadcast_id, BROADCAST_ID);
    }
}
