//! Actuator drivers, GPIO bring-up, and the task watchdog.

pub mod gpio;
pub mod relay;
pub mod watchdog;
