//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `forumlive` crate.
//!
//! This module centralizes the error type shared by the transport, presence
//! and topic layers, and the logging bootstrap used by the binary.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
