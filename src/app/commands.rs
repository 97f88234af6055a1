//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (the
//! Administrative API, the serial console) that the
//! [`AppService`](super::service::AppService) interprets and acts upon.

use crate::rules::Rule;
use crate::sensors::SensorReadings;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    /// Replace the whole rule set; persisted after the save debounce.
    ReplaceRules(Vec<Rule>),

    /// Manual relay override.  Bypasses lock bookkeeping, so the next rule
    /// tick may override it.
    SetRelay { node: u8, channel: u8, on: bool },

    /// Overlay sensor readings (boards without sensors fitted).
    InjectSensorReadings(SensorReadings),

    /// Rebuild the Node Table on the next loop pass.
    Reenumerate,

    /// Persist the current rule set on the next save check.
    SaveRules,
}
