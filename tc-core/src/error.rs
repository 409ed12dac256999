//! Error types for Thermocam
//!
//! Re-exports the unified error type from the tc-error crate.

pub use tc_error::{DecodeError, Result, ThermocamError};
