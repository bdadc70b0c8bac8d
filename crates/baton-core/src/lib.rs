//! `Baton` Core Library
//!
//! Shared functionality for `Baton` components:
//! - Configuration resolution (defaults, JSON file, environment)
//! - Tracing/logging initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{Config, LoggingConfig, SchedulerConfig};
pub use error::{Error, Result};
