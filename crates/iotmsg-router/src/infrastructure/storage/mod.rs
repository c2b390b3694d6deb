//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML file that declares connections,
//! their routes and the bridges between them, and supplies defaults when the
//! file does not exist yet.

pub mod config;
