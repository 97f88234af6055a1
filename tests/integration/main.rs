//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against mock adapters and the simulated node chain.  All tests run on
//! the host (x86_64) with no real hardware required.

#![cfg(not(target_os = "espidf"))]

mod admin_tests;
mod app_service_tests;
mod enumeration_tests;
mod mock_hw;
