//! # Jobforge Config
//!
//! Configuration management for Jobforge.
//! Supports layered configuration from files and environment variables,
//! with validation that fails fast on inconsistent values.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
