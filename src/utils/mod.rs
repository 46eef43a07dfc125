//! Utility functions and types for the collector node.

pub mod error;
mod fs;
mod logging;

pub use error::Error;
pub use fs::*;
pub use logging::init_logging;
#[cfg(test)]
pub(crate) use logging::init_test_logging;
