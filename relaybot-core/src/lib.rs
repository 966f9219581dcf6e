//! Shared types for the relay bot: run records, command outcomes, errors and
//! configuration.

pub mod config;
mod error;
mod models;

pub use config::{Config, ProjectConfig, SlackConfig};
pub use error::{RelayError, Result};
pub use models::*;
