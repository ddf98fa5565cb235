//! Configuration module for reqseal.
//!
//! Handles loading and validating daemon configuration from TOML files.

mod settings;

pub use settings::*;
