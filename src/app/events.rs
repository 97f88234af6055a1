//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them (log to serial, push to the web UI).

use crate::app::ports::StorageError;
use crate::enumeration::Outcome;

/// Who asked for a relay change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuationSource {
    Rule,
    Manual,
}

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The service has started.
    Started { rule_count: usize },

    /// An enumeration run reached a terminal state.
    EnumerationFinished {
        outcome: Outcome,
        nodes: usize,
        unreachable: usize,
        truncated: bool,
    },

    /// A relay was switched (local) or a switch was delivered (forwarded).
    RelayChanged {
        node: u8,
        channel: u8,
        on: bool,
        source: ActuationSource,
    },

    /// A rule tick changed something.
    RuleTick {
        actuations: usize,
        locks_created: usize,
        locks_released: usize,
    },

    /// A Slave stopped answering.
    NodeUnreachable { position: u8, address: u8 },

    /// A Slave previously marked unreachable answered again.
    NodeRecovered { position: u8, address: u8 },

    /// The chain changed shape; re-enumeration is scheduled.
    TopologyChanged,

    /// The rule set was replaced wholesale.
    RulesReplaced { count: usize },

    /// The rule set was written to persistent storage.
    RulesSaved { count: usize },

    /// Persisting the rule set failed; the in-memory set is kept.
    RulesSaveFailed(StorageError),
}
