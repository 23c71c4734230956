//! # Jobforge Core
//!
//! Core types shared by every Jobforge crate: the unified error type,
//! result aliases, and logging initialisation.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::{init_logging, LogFormat, LoggingConfig};

// Re-export shaku for dependency injection
pub use shaku::Interface;
