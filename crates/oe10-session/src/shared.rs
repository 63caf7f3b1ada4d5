//! ---
//! oe10_section: "03-device-session"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Device session state machine and byte channel seam."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
use std::sync::Arc;

use oe10_protocol::{Position, StatusSnapshot};
use parking_lot::Mutex;

use crate::channel::ByteChannel;
use crate::session::DeviceSession;
use crate::Result;

/// Cloneable handle serialising access to one [`DeviceSession`].
///
/// The lock is held for exactly one operation, so requests from different
/// threads never interleave on the wire.
pub struct SharedSession<C: ByteChannel> {
    inner: Arc<Mutex<DeviceSession<C>>>,
}

impl<C: ByteChannel> Clone for SharedSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ByteChannel> SharedSession<C> {
    /// Wrap an open session.
    pub fn new(session: DeviceSession<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Run `operation` with exclusive access to the session.
    pub fn with<R>(&self, operation: impl FnOnce(&mut DeviceSession<C>) -> R) -> R {
        let mut session = self.inner.lock();
        operation(&mut session)
    }

    /// Shorthand for [`DeviceSession::query_status`].
    pub fn query_status(&self) -> Result<StatusSnapshot> {
        self.with(DeviceSession::query_status)
    }

    /// Shorthand for [`DeviceSession::cached_position`].
    pub fn cached_position(&self) -> Position {
        self.with(|session| session.cached_position())
    }

    /// Shorthand for [`DeviceSession::close`].
    pub fn close(&self) -> Result<()> {
        self.with(DeviceSession::close)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::session::SessionConfig;
    use crate::sim::SimulatedPeripheral;
    use crate::SessionError;

    #[test]
    fn concurrent_callers_never_interleave_frames() {
        let unit = SimulatedPeripheral::new(0x03);
        let session =
            DeviceSession::open(unit.clone(), SessionConfig::default()).expect("session opens");
        let shared = SharedSession::new(session);

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for step in 0..5 {
                        let target = f64::from(worker * 10 + step);
                        shared
                            .with(|session| session.move_pan_to(target))
                            .expect("pan move");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker finished");
        }

        assert_eq!(unit.requests().len(), 20);
        assert_eq!(shared.cached_position().pan, unit.position().pan);
    }

    #[test]
    fn close_through_any_handle() {
        let unit = SimulatedPeripheral::new(0x03);
        let shared = SharedSession::new(
            DeviceSession::open(unit, SessionConfig::default()).expect("session opens"),
        );
        let other = shared.clone();
        shared.close().expect("close");
        assert!(matches!(other.query_status(), Err(SessionError::SessionClosed)));
    }
}
