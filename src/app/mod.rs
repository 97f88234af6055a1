//! Application core — pure domain logic, zero I/O.
//!
//! This module contains the Controller's orchestration: rule ticks,
//! forwarding to Slaves, node health and rule persistence.  All
//! interaction with hardware happens through **port traits** defined in
//! [`ports`], keeping this layer fully testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
