//! Rotator: four-phase rotation of database credentials held in a secret store.
//!
//! The binary in `main.rs` and the integration tests in `tests/` both build
//! on these modules.

pub mod api;
pub mod cli;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod password;
pub mod rotation;
pub mod stages;
pub mod vault;
