//! Share pack provisioning worker.
//!
//! Process-level wiring around `sharepack_core`: YAML configuration, the
//! HTTPS adapter for the data platform and, with the `database` feature,
//! the Postgres-backed worker.

pub mod config;
pub mod platform_http;

#[cfg(feature = "database")]
pub mod worker;

pub use config::ProvisionerConfig;
pub use platform_http::{HttpConnector, HttpPlatformClient};
