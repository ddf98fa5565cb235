//! Error types for reqseal.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
