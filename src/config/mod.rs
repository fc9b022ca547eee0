//! Configuration model for advlock.
//!
//! This module defines the Config struct read from a YAML file (usually
//! passed with `--config`). It supports forward-compatible YAML parsing
//! (unknown fields are ignored), sensible defaults for optional fields, and
//! validation of config values.

mod model;
mod operations;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use model::Config;
