//! Utility modules for the push agent.

pub mod errors;
pub mod logger;

pub use errors::{PushError, Result};
