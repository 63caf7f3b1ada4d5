//! ---
//! oe10_section: "04-transport"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Serial-port byte channel."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! [`ByteChannel`] over a local serial port, configured from [`LinkConfig`].
#![warn(missing_docs)]

use std::io::{self, Read, Write};
use std::time::Duration;

use oe10_common::config::{LinkConfig, Parity};
use oe10_session::{ByteChannel, SessionError};
use serialport::{ClearBuffer, DataBits, SerialPort, StopBits};
use thiserror::Error;
use tracing::{debug, info};

const READ_CHUNK: usize = 256;
/// Shortest timeout handed to the driver; zero would mean "block forever" on some platforms.
const MIN_READ_WAIT: Duration = Duration::from_millis(1);

/// Failures opening or configuring the serial line.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The driver refused to open the port.
    #[error("failed to open serial port {path}: {source}")]
    Open {
        /// Device path.
        path: String,
        /// Driver error.
        #[source]
        source: serialport::Error,
    },
    /// A line setting has no serial-port equivalent.
    #[error("unsupported {setting} value {value}")]
    UnsupportedSetting {
        /// Setting name.
        setting: &'static str,
        /// Rejected value.
        value: u8,
    },
}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        SessionError::Connection(err.to_string())
    }
}

/// Line settings translated for the serial driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Device path.
    pub path: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Parity mode.
    pub parity: serialport::Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Initial read timeout.
    pub timeout: Duration,
}

impl SerialSettings {
    /// Translate `link`, rejecting values the driver cannot express.
    pub fn from_link(link: &LinkConfig) -> Result<Self, ConnectionError> {
        let data_bits = match link.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(ConnectionError::UnsupportedSetting {
                    setting: "data_bits",
                    value: other,
                })
            }
        };
        let stop_bits = match link.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => {
                return Err(ConnectionError::UnsupportedSetting {
                    setting: "stop_bits",
                    value: other,
                })
            }
        };
        let parity = match link.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        Ok(Self {
            path: link.port.clone(),
            baud_rate: link.baud_rate,
            data_bits,
            parity,
            stop_bits,
            timeout: link.read_timeout,
        })
    }
}

/// Serial port acting as a [`ByteChannel`].
pub struct SerialChannel {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialChannel {
    /// Open the port described by `link`.
    pub fn open(link: &LinkConfig) -> Result<Self, ConnectionError> {
        let settings = SerialSettings::from_link(link)?;
        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .timeout(settings.timeout)
            .open()
            .map_err(|source| ConnectionError::Open {
                path: settings.path.clone(),
                source,
            })?;
        info!(
            path = %settings.path,
            baud = settings.baud_rate,
            "serial port opened"
        );
        Ok(Self {
            path: settings.path,
            port: Some(port),
        })
    }

    /// Device path of the port.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

impl ByteChannel for SerialChannel {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn read_available(&mut self, max_wait: Duration) -> io::Result<Vec<u8>> {
        let port = self.port()?;
        port.set_timeout(max_wait.max(MIN_READ_WAIT))?;
        let mut buf = [0u8; READ_CHUNK];
        match port.read(&mut buf) {
            Ok(read) => Ok(buf[..read].to_vec()),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(port) = self.port.take() {
            port.clear(ClearBuffer::All)?;
            debug!(path = %self.path, "serial port closed");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_link_is_9600_8n1() {
        let settings = SerialSettings::from_link(&LinkConfig::default()).expect("settings");
        assert_eq!(settings.path, "/dev/ttyAMA0");
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.data_bits, DataBits::Eight);
        assert_eq!(settings.parity, serialport::Parity::None);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.timeout, Duration::from_millis(1000));
    }

    #[test]
    fn unsupported_settings_are_rejected() {
        let link = LinkConfig {
            data_bits: 9,
            ..LinkConfig::default()
        };
        let err = SerialSettings::from_link(&link).expect_err("nine data bits");
        assert_eq!(err.to_string(), "unsupported data_bits value 9");

        let link = LinkConfig {
            stop_bits: 3,
            parity: Parity::Even,
            ..LinkConfig::default()
        };
        assert!(matches!(
            SerialSettings::from_link(&link),
            Err(ConnectionError::UnsupportedSetting {
                setting: "stop_bits",
                value: 3
            })
        ));
    }

    #[test]
    fn missing_port_becomes_connection_error() {
        let link = LinkConfig {
            port: "/dev/oe10-does-not-exist".into(),
            ..LinkConfig::default()
        };
        let err = SerialChannel::open(&link).err().expect("port is absent");
        assert!(err.to_string().contains("/dev/oe10-does-not-exist"));
        let session_err: SessionError = err.into();
        assert!(matches!(session_err, SessionError::Connection(_)));
    }
}
