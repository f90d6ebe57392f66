//! Utility modules for the recovery engine.

pub mod errors;
pub mod logger;

pub use errors::{DrError, Result};
