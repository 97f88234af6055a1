//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).
//! A web-socket push to the panel would implement the same trait.

use log::{info, warn};

use crate::app::events::{ActuationSource, AppEvent};
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started { rule_count } => {
                info!("START | rules={}", rule_count);
            }
            AppEvent::EnumerationFinished {
                outcome,
                nodes,
                unreachable,
                truncated,
            } => {
                info!(
                    "ENUM | {:?} | nodes={} unreachable={} truncated={}",
                    outcome, nodes, unreachable, truncated
                );
            }
            AppEvent::RelayChanged {
                node,
                channel,
                on,
                source,
            } => {
                let by = match source {
                    ActuationSource::Rule => "rule",
                    ActuationSource::Manual => "manual",
                };
                info!(
                    "RELAY | node={} ch={} -> {} | by={}",
                    node,
                    channel,
                    if *on { "ON" } else { "OFF" },
                    by
                );
            }
            AppEvent::RuleTick {
                actuations,
                locks_created,
                locks_released,
            } => {
                info!(
                    "RULES | actuations={} locks +{} -{}",
                    actuations, locks_created, locks_released
                );
            }
            AppEvent::NodeUnreachable { position, address } => {
                warn!("NODE | pos={} addr=0x{:02x} unreachable", position, address);
            }
            AppEvent::NodeRecovered { position, address } => {
                info!("NODE | pos={} addr=0x{:02x} recovered", position, address);
            }
            AppEvent::TopologyChanged => {
                info!("ENUM | topology changed, re-enumeration scheduled");
            }
            AppEvent::RulesReplaced { count } => {
                info!("RULES | replaced, count={}", count);
            }
            AppEvent::RulesSaved { count } => {
                info!("RULES | saved, count={}", count);
            }
            AppEvent::RulesSaveFailed(e) => {
                warn!("RULES | save failed: {}", e);
            }
        }
    }
}
