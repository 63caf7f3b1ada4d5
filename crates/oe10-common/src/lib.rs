//! ---
//! oe10_section: "01-core-functionality"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Shared configuration and logging primitives."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
//! Shared primitives for the OE10 workspace: configuration loading and
//! tracing initialisation consumed by the session, transport and CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, DeviceConfig, LinkConfig, LoadedAppConfig, LoggingConfig, Parity,
    MAX_PERIPHERAL_ID, MIN_PERIPHERAL_ID,
};
pub use logging::{init_tracing, LogFormat};
