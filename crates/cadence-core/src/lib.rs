//! `cadence-core` — configuration, timezone helpers and the shared error type.

pub mod config;
pub mod error;
pub mod tz;

pub use config::{CadenceConfig, DatabaseConfig, EngineConfig, OffPeakConfig, SchedulerConfig};
pub use error::{CadenceError, Result};
