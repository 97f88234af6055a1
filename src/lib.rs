//! TerraHub firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod bus;
pub mod config;
pub mod enumeration;
pub mod error;
pub mod pins;
pub mod rules;
pub mod scheduler;

// Hardware-facing layers; each module selects its ESP-IDF or host backend
// internally.
pub mod adapters;
pub mod drivers;
pub mod sensors;
