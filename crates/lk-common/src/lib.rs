//! Latchkey common utilities
//!
//! Shared between the election crates and the binaries. Currently this is the
//! logging bootstrap; everything else lives in the crate that owns it.

pub mod logging;

pub use logging::{init_logging, init_test_logging, LogFormat};
