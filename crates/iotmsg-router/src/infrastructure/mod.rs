//! Infrastructure layer for the router.
//!
//! Contains the concrete pieces the application layer is written against:
//! in-process transports, the TOML config file, startup wiring, the admin
//! input reader and the engine loop.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `iotmsg_core`, but MUST NOT be imported by the `application` layer.

pub mod admin_input;
pub mod app_state;
pub mod connections;
pub mod engine;
pub mod storage;
