//! Client configuration and telemetry bootstrap.

pub mod config;
pub mod telemetry;

pub use config::ClientOptions;
