//! ---
//! oe10_section: "05-networking-external-interfaces"
//! oe10_subsection: "binary"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Operator CLI driving a single OE10-104 unit."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use oe10_protocol::{Axis, Diagnostics, Direction, Position, StatusSnapshot, VersionReport};
use oe10_session::{ByteChannel, DeviceSession};
use serde::Serialize;

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(about = "Query status flags, environment and positions")]
    Status,
    #[command(about = "Query protocol and software versions")]
    Versions,
    #[command(about = "Move pan to an absolute angle (wrapped into 0..360)")]
    Pan {
        #[arg(allow_negative_numbers = true)]
        degrees: f64,
    },
    #[command(about = "Move tilt to an absolute angle (clamped into -90..=90)")]
    Tilt {
        #[arg(allow_negative_numbers = true)]
        degrees: f64,
    },
    #[command(about = "Jog one axis")]
    Jog {
        #[arg(value_enum)]
        axis: AxisArg,
        #[arg(value_enum)]
        direction: DirectionArg,
    },
    #[command(about = "Stop one axis")]
    Stop {
        #[arg(value_enum)]
        axis: AxisArg,
    },
    #[command(about = "Proportional speed drive; directions by sign, speeds 0..=100")]
    Drive {
        #[arg(allow_negative_numbers = true)]
        pan_direction: i32,
        #[arg(allow_negative_numbers = true)]
        tilt_direction: i32,
        pan_speed: i32,
        tilt_speed: i32,
        /// Ask the unit to echo both positions.
        #[arg(long)]
        feedback: bool,
    },
    #[command(name = "set-id", about = "Assign a new peripheral id (hex, 02..FE)")]
    SetId {
        #[arg(value_parser = parse_peripheral_id)]
        id: u8,
    },
    #[command(about = "Dump the unit's error diagnosis")]
    Diagnose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AxisArg {
    Pan,
    Tilt,
}

impl From<AxisArg> for Axis {
    fn from(value: AxisArg) -> Self {
        match value {
            AxisArg::Pan => Axis::Pan,
            AxisArg::Tilt => Axis::Tilt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    /// Pan left or tilt down.
    #[value(alias = "left", alias = "down")]
    Negative,
    /// Pan right or tilt up.
    #[value(alias = "right", alias = "up")]
    Positive,
}

impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Negative => Direction::Negative,
            DirectionArg::Positive => Direction::Positive,
        }
    }
}

/// Result of one subcommand, printable as text or JSON.
#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Output {
    Status(StatusSnapshot),
    Versions(VersionReport),
    Pan { pan: u16 },
    Tilt { tilt: i16 },
    Position(Position),
    Drive { accepted: bool },
    PeripheralId { peripheral_id: u8 },
    Diagnostics(Diagnostics),
}

impl Output {
    pub fn render(&self, json: bool) -> Result<String> {
        if json {
            return serde_json::to_string_pretty(self).context("failed to serialise output");
        }
        Ok(match self {
            Output::Status(status) => format!(
                "pan supported: {}\ntilt supported: {}\nerror present: {}\ntemperature: {} C\nhumidity: {} %\npan position: {}\ntilt position: {}",
                status.pan_supported,
                status.tilt_supported,
                status.error_present,
                status.temperature_c,
                status.humidity_pct,
                status.pan_position,
                status.tilt_position
            ),
            Output::Versions(versions) => format!(
                "protocol: {}\nsoftware: {}",
                versions.protocol, versions.software
            ),
            Output::Pan { pan } => format!("pan: {pan}"),
            Output::Tilt { tilt } => format!("tilt: {tilt}"),
            Output::Position(position) => {
                format!("pan: {}\ntilt: {}", position.pan, position.tilt)
            }
            Output::Drive { accepted: true } => "drive accepted".to_owned(),
            Output::Drive { accepted: false } => "drive refused by unit".to_owned(),
            Output::PeripheralId { peripheral_id } => {
                format!("peripheral id: {peripheral_id:#04X}")
            }
            Output::Diagnostics(diag) => format!("hex: {}\ntext: {}", diag.hex, diag.text),
        })
    }
}

pub fn run<C: ByteChannel>(session: &mut DeviceSession<C>, command: &Command) -> Result<Output> {
    let output = match *command {
        Command::Status => Output::Status(session.query_status()?),
        Command::Versions => Output::Versions(session.query_versions()?),
        Command::Pan { degrees } => Output::Pan {
            pan: session.move_pan_to(degrees)?,
        },
        Command::Tilt { degrees } => Output::Tilt {
            tilt: session.move_tilt_to(degrees)?,
        },
        Command::Jog { axis, direction } => {
            Output::Position(session.jog(axis.into(), direction.into())?)
        }
        Command::Stop { axis } => Output::Position(session.stop(axis.into())?),
        Command::Drive {
            pan_direction,
            tilt_direction,
            pan_speed,
            tilt_speed,
            feedback: true,
        } => Output::Position(session.drive_proportional_with_feedback(
            pan_direction,
            tilt_direction,
            pan_speed,
            tilt_speed,
        )?),
        Command::Drive {
            pan_direction,
            tilt_direction,
            pan_speed,
            tilt_speed,
            feedback: false,
        } => Output::Drive {
            accepted: session.drive_proportional(
                pan_direction,
                tilt_direction,
                pan_speed,
                tilt_speed,
            )?,
        },
        Command::SetId { id } => {
            session.reassign_peripheral_id(id)?;
            Output::PeripheralId {
                peripheral_id: session.peripheral_id(),
            }
        }
        Command::Diagnose => Output::Diagnostics(session.diagnose()?),
    };
    Ok(output)
}

/// Parse a peripheral id written in hex, with or without a `0x` prefix.
pub fn parse_peripheral_id(raw: &str) -> std::result::Result<u8, String> {
    let digits = raw
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|err| format!("`{raw}` is not a hex byte: {err}"))
}
