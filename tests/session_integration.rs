//! ---
//! oe10_section: "15-testing-qa-runbook"
//! oe10_subsection: "integration-tests"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "End-to-end session tests against the simulated unit."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
use std::time::Duration;

use oe10_protocol::{Axis, Direction, NakCode, Position};
use oe10_session::{
    DeviceSession, Phase, SessionConfig, SessionError, SessionState, SimulatedPeripheral,
};

fn open(unit: &SimulatedPeripheral) -> DeviceSession<SimulatedPeripheral> {
    DeviceSession::open(
        unit.clone(),
        SessionConfig {
            peripheral_id: unit.peripheral_id(),
            read_timeout: Duration::from_millis(50),
            status_cache: Duration::ZERO,
        },
    )
    .expect("session opens")
}

#[test]
fn absolute_moves_follow_the_unit() {
    let unit = SimulatedPeripheral::new(0x03);
    let mut session = open(&unit);

    assert_eq!(session.move_pan_to(370.0).expect("pan"), 10);
    assert_eq!(session.move_tilt_to(-200.0).expect("tilt"), -90);
    assert_eq!(session.cached_position(), unit.position());

    assert_eq!(session.move_tilt_to(45.4).expect("tilt"), 45);
    assert_eq!(unit.position(), Position { pan: 10, tilt: 45 });
    assert_eq!(unit.request_codes(), vec!["PP", "TD", "TP"]);
}

#[test]
fn status_reports_unit_state() {
    let unit = SimulatedPeripheral::new(0x03).with_position(Position { pan: 180, tilt: 30 });
    unit.set_error_present(true);
    unit.set_environment(0x00);
    let mut session = open(&unit);

    let status = session.query_status().expect("status");
    assert!(status.pan_supported && status.tilt_supported);
    assert!(status.error_present);
    assert_eq!(status.temperature_c, -5);
    assert_eq!(status.humidity_pct, 0);
    assert_eq!((status.pan_position, status.tilt_position), (180, 30));
}

#[test]
fn jog_and_stop_round_trip() {
    let unit = SimulatedPeripheral::new(0x03).with_position(Position { pan: 0, tilt: 0 });
    let mut session = open(&unit);

    assert_eq!(session.jog(Axis::Pan, Direction::Negative).expect("left").pan, 355);
    assert_eq!(session.jog(Axis::Tilt, Direction::Positive).expect("up").tilt, 5);
    assert_eq!(session.stop(Axis::Pan).expect("stop pan").pan, 355);
    assert_eq!(session.stop(Axis::Tilt).expect("stop tilt").tilt, 5);
    assert_eq!(unit.request_codes(), vec!["PL", "TU", "PS", "TS"]);
}

#[test]
fn single_dropped_reply_is_recovered() {
    let unit = SimulatedPeripheral::new(0x03);
    let mut session = open(&unit);
    unit.drop_next_replies(1);

    assert_eq!(session.move_pan_to(90.0).expect("retry answers"), 90);
    assert_eq!(unit.request_codes(), vec!["PP", "PP"]);
    assert_eq!(session.phase(), Phase::Settled);
}

#[test]
fn two_dropped_replies_time_out() {
    let unit = SimulatedPeripheral::new(0x03);
    let mut session = open(&unit);
    unit.drop_next_replies(2);

    let err = session.query_status().expect_err("unit stays silent");
    assert!(matches!(err, SessionError::DeviceTimeout { attempts: 2, .. }));
    assert_eq!(unit.requests().len(), 2);
    assert_eq!(session.phase(), Phase::TimedOut);

    assert_eq!(session.move_pan_to(45.0).expect("unit answers again"), 45);
    assert_eq!(session.phase(), Phase::Settled);
}

#[test]
fn garbled_status_is_retried_but_motion_is_not() {
    let unit = SimulatedPeripheral::new(0x03);
    let mut session = open(&unit);

    unit.garble_next_replies(1);
    session.query_status().expect("status recovers");
    assert_eq!(unit.requests().len(), 2);

    unit.garble_next_replies(1);
    let err = session.move_pan_to(20.0).expect_err("motion surfaces garbling");
    assert!(matches!(err, SessionError::Framing(_)));
    assert_eq!(unit.requests().len(), 3);
}

#[test]
fn nak_surfaces_with_reason() {
    let unit = SimulatedPeripheral::new(0x03);
    let mut session = open(&unit);
    unit.nak_next(0x08);

    let err = session.diagnose().expect_err("rejected");
    assert_eq!(err.nak_code(), Some(NakCode::CommandUnsupported));
    assert!(err.to_string().contains("command unsupported by device"));
}

#[test]
fn proportional_drive_with_and_without_feedback() {
    let unit = SimulatedPeripheral::new(0x03).with_position(Position { pan: 100, tilt: -20 });
    let mut session = open(&unit);

    assert!(session.drive_proportional(1, 0, 40, 0).expect("drive"));
    unit.nak_next(0x04);
    assert!(!session.drive_proportional(0, 1, 0, 40).expect("refused drive"));

    let position = session
        .drive_proportional_with_feedback(0, -1, 0, 30)
        .expect("feedback drive");
    assert_eq!(position, Position { pan: 105, tilt: -25 });
    assert_eq!(position, unit.position());
}

#[test]
fn versions_and_diagnostics() {
    let unit = SimulatedPeripheral::new(0x03);
    let mut session = open(&unit);

    let versions = session.query_versions().expect("versions");
    assert_eq!(versions.protocol.to_string(), "01.02.03");
    assert_eq!(versions.software.to_string(), "02.01.00");

    let diagnostics = session.diagnose().expect("diagnose");
    assert_eq!(diagnostics.text, "OK");
    assert_eq!(diagnostics.hex, "4F4B");
}

#[test]
fn reassignment_moves_the_conversation() {
    let unit = SimulatedPeripheral::new(0x03);
    let mut session = open(&unit);

    session.reassign_peripheral_id(0x10).expect("reassigned");
    assert_eq!(unit.peripheral_id(), 0x10);
    assert_eq!(session.peripheral_id(), 0x10);
    session.move_pan_to(30.0).expect("unit answers on new id");

    let before = unit.requests().len();
    for reserved in [0x01, 0xFF] {
        assert!(matches!(
            session.reassign_peripheral_id(reserved),
            Err(SessionError::InvalidArgument(_))
        ));
    }
    assert_eq!(unit.requests().len(), before);
}

#[test]
fn local_echo_is_ignored() {
    let unit = SimulatedPeripheral::new(0x03).with_local_echo(true);
    let mut session = open(&unit);
    assert_eq!(session.move_pan_to(15.0).expect("pan"), 15);
    assert_eq!(unit.requests().len(), 1);
}

#[test]
fn status_cache_spares_the_wire() {
    let unit = SimulatedPeripheral::new(0x03);
    let mut session = DeviceSession::open(
        unit.clone(),
        SessionConfig {
            status_cache: Duration::from_secs(30),
            ..SessionConfig::default()
        },
    )
    .expect("session");
    session.query_status().expect("first");
    session.query_status().expect("cached");
    assert_eq!(unit.request_codes(), vec!["ST"]);
}

#[test]
fn closed_session_rejects_everything() {
    let unit = SimulatedPeripheral::new(0x03);
    let mut session = open(&unit);
    session.move_pan_to(5.0).expect("pan");
    session.close().expect("close");
    session.close().expect("idempotent");

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.cached_position(), Position::default());
    assert!(matches!(session.query_versions(), Err(SessionError::SessionClosed)));
    assert!(matches!(
        session.drive_proportional(1, 1, 10, 10),
        Err(SessionError::SessionClosed)
    ));
}
