//! ---
//! oe10_section: "05-networking-external-interfaces"
//! oe10_subsection: "binary"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Operator CLI driving a single OE10-104 unit."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use oe10_common::config::{AppConfig, LoadedAppConfig};
use oe10_common::logging::init_tracing;
use oe10_session::{ByteChannel, DeviceSession, SessionConfig, SimulatedPeripheral};
use oe10_transport::SerialChannel;
use tracing::info;

mod commands;

use commands::Command;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Drive an OE10-104 pan/tilt unit over its serial link",
    long_about = None
)]
struct Cli {
    /// Configuration file; `OE10_CONFIG` and `configs/oe10.toml` are tried otherwise.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Serial device, overriding `[link].port`.
    #[arg(long, global = true, value_name = "DEVICE")]
    port: Option<String>,
    /// Peripheral id in hex (`03`, `0x2A`), overriding `[device].peripheral_id`.
    #[arg(long, global = true, value_parser = commands::parse_peripheral_id)]
    peripheral_id: Option<u8>,
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
    /// Talk to an in-process simulated unit instead of a serial port.
    #[arg(long, global = true)]
    simulate: bool,
    #[command(subcommand)]
    command: Command,
}

const DEFAULT_CANDIDATES: [&str; 2] = ["configs/oe10.toml", "/etc/oe10/oe10.toml"];

fn load_config(cli: &Cli) -> Result<LoadedAppConfig> {
    let mut loaded = match &cli.config {
        Some(path) => AppConfig::load_with_source(std::slice::from_ref(path))?,
        None => {
            let candidates: Vec<PathBuf> = DEFAULT_CANDIDATES.iter().map(PathBuf::from).collect();
            AppConfig::load_with_source(&candidates).unwrap_or_else(|_| LoadedAppConfig {
                config: AppConfig::default(),
                source: PathBuf::from("<built-in defaults>"),
            })
        }
    };
    if let Some(port) = &cli.port {
        loaded.config.link.port = port.clone();
    }
    if let Some(id) = cli.peripheral_id {
        loaded.config.device.peripheral_id = id;
    }
    loaded
        .config
        .validate()
        .context("command-line overrides produced an invalid configuration")?;
    Ok(loaded)
}

fn open_channel(cli: &Cli, config: &AppConfig) -> Result<Box<dyn ByteChannel>> {
    if cli.simulate {
        return Ok(Box::new(SimulatedPeripheral::new(config.device.peripheral_id)));
    }
    let channel = SerialChannel::open(&config.link)?;
    Ok(Box::new(channel))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = load_config(&cli)?;
    let config = &loaded.config;
    init_tracing("oe10ctl", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    let channel = open_channel(&cli, config)?;
    let mut session = DeviceSession::open(channel, SessionConfig::from(config))?;
    let outcome = commands::run(&mut session, &cli.command);
    session.close()?;
    let output = outcome?;
    println!("{}", output.render(cli.json)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "oe10ctl",
            "pan",
            "370",
            "--peripheral-id",
            "0x2A",
            "--json",
            "--simulate",
        ])
        .expect("arguments parse");
        assert_eq!(cli.peripheral_id, Some(0x2A));
        assert!(cli.json && cli.simulate);
        assert!(matches!(cli.command, Command::Pan { degrees } if degrees == 370.0));
    }

    #[test]
    fn negative_tilt_is_a_value_not_a_flag() {
        let cli = Cli::try_parse_from(["oe10ctl", "tilt", "-45"]).expect("arguments parse");
        assert!(matches!(cli.command, Command::Tilt { degrees } if degrees == -45.0));
    }

    #[test]
    fn overrides_are_validated() {
        let cli = Cli::try_parse_from(["oe10ctl", "--peripheral-id", "ff", "status"])
            .expect("arguments parse");
        let err = load_config(&cli).expect_err("broadcast id rejected");
        assert!(format!("{err:#}").contains("peripheral_id"));
    }

    #[test]
    fn simulated_run_end_to_end() {
        let cli = Cli::try_parse_from(["oe10ctl", "--simulate", "--config", "/nonexistent.toml", "status"])
            .expect("arguments parse");
        assert!(load_config(&cli).is_err());

        let cli = Cli::try_parse_from(["oe10ctl", "--simulate", "pan", "90"]).expect("parse");
        let config = AppConfig::default();
        let channel = open_channel(&cli, &config).expect("simulated channel");
        let mut session =
            DeviceSession::open(channel, SessionConfig::from(&config)).expect("session");
        let output = commands::run(&mut session, &cli.command).expect("pan runs");
        assert_eq!(output.render(false).expect("text"), "pan: 90");
    }
}
