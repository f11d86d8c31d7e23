//! # Sync Gateway Runtime
//!
//! Process wiring for the `sync-gateway` binary.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults, `SYNCGW_CONFIG` file, `SYNCGW_*` env)
//! 2. Initialize logging
//! 3. Bind proxy, callback, and admin listeners
//! 4. Serve until Ctrl+C, then drain

pub mod config;
pub mod telemetry;

pub use config::{load_config, load_config_from, RuntimeConfigError};
pub use telemetry::{init_tracing, TelemetryError};
