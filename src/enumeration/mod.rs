//! Node Enumeration Protocol (Controller side).
//!
//! Discovers an unknown number of daisy-chained Slaves and hands each a
//! unique bus address, one node at a time.
//!
//! ```text
//!            ┌──────────────────────────────────────────────────────┐
//!            ▼                                                      │ ack
//!  Idle ─▶ Scanning(p) ─▶ Assigning(p) ─ack─▶ Verifying(p) ─────────┘ (p+1)
//!            │  p > max       │ timeout          │ retries spent
//!            ▼  (probe)       ▼                  ▼
//!           Done ◀────────── Done            Failed(p) ─▶ Scanning(p+1)  (continue_past_unreachable)
//!                                                      └▶ Done           (otherwise)
//!                                    retry budget spent ─▶ Failed (terminal)
//! ```
//!
//! Only one unassigned Slave is ever enabled: the presence line of each
//! Slave stays low until that Slave has adopted an address.  Every
//! Assigning step therefore talks to exactly one node even though all
//! unassigned nodes share the default address.
//!
//! The run is a bounded sequence of blocking transactions.  Each step
//! either succeeds, times out, or consumes one unit of the run's retry
//! budget; nothing waits indefinitely.

pub mod table;

use log::{debug, info, warn};

use crate::app::ports::TimePort;
use crate::bus::{transact, BusPort, Command, PresenceLine, Request};
use crate::config::SystemConfig;
use crate::error::BusError;

pub use table::{NodeRecord, NodeTable, TableError};

// ───────────────────────────────────────────────────────────────
// States and report
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationState {
    Idle,
    /// Looking for an unassigned node to become position `p`.
    Scanning(u8),
    Assigning(u8),
    Verifying(u8),
    Done,
    /// Position `p` took an address but never verified.  Terminal only when
    /// the run's retry budget is exhausted.
    Failed(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationReport {
    pub outcome: Outcome,
    pub table: NodeTable,
    /// More nodes answered beyond `max_nodes`.
    pub truncated: bool,
    /// Positions that were assigned but never verified.
    pub unreachable: Vec<u8>,
    pub retries_used: u8,
}

// ───────────────────────────────────────────────────────────────
// Enumerator
// ───────────────────────────────────────────────────────────────

pub struct Enumerator {
    default_address: u8,
    address_base: u8,
    max_nodes: u8,
    bus_timeout_ms: u32,
    gate_settle_ms: u32,
    verify_retries: u8,
    retry_budget: u8,
    continue_past_unreachable: bool,

    state: EnumerationState,
    table: NodeTable,
    attempts: u8,
    retries_used: u8,
    budget_exhausted: bool,
    truncated: bool,
    unreachable: Vec<u8>,
}

impl Enumerator {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            default_address: config.default_address,
            address_base: config.address_base,
            max_nodes: config.max_nodes,
            bus_timeout_ms: config.bus_timeout_ms,
            gate_settle_ms: config.gate_settle_ms,
            verify_retries: config.verify_retries.max(1),
            retry_budget: config.retry_budget,
            continue_past_unreachable: config.continue_past_unreachable,
            state: EnumerationState::Idle,
            table: NodeTable::new(),
            attempts: 0,
            retries_used: 0,
            budget_exhausted: false,
            truncated: false,
            unreachable: Vec::new(),
        }
    }

    pub fn state(&self) -> EnumerationState {
        self.state
    }

    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    pub fn is_finished(&self) -> bool {
        match self.state {
            EnumerationState::Done => true,
            EnumerationState::Failed(_) => self.budget_exhausted,
            _ => false,
        }
    }

    /// Run from Idle to a terminal state.  Any previous table is discarded.
    pub fn run(
        &mut self,
        link: &mut (impl BusPort + PresenceLine),
        clock: &mut impl TimePort,
    ) -> EnumerationReport {
        self.reset();
        info!("Enum: starting (base=0x{:02x}, max_nodes={})", self.address_base, self.max_nodes);
        while !self.is_finished() {
            self.step(link, clock);
        }
        let report = self.report();
        info!(
            "Enum: {:?} with {} node(s), unreachable={:?}, truncated={}, retries={}",
            report.outcome,
            report.table.len(),
            report.unreachable,
            report.truncated,
            report.retries_used
        );
        report
    }

    /// Snapshot of the current result.
    pub fn report(&self) -> EnumerationReport {
        EnumerationReport {
            outcome: if self.budget_exhausted {
                Outcome::Failed
            } else {
                Outcome::Done
            },
            table: self.table.clone(),
            truncated: self.truncated,
            unreachable: self.unreachable.clone(),
            retries_used: self.retries_used,
        }
    }

    /// Return to Idle with an empty table.
    pub fn reset(&mut self) {
        self.state = EnumerationState::Idle;
        self.table.clear();
        self.attempts = 0;
        self.retries_used = 0;
        self.budget_exhausted = false;
        self.truncated = false;
        self.unreachable.clear();
    }

    /// Perform exactly one transition and return the new state.
    pub fn step(
        &mut self,
        link: &mut (impl BusPort + PresenceLine),
        clock: &mut impl TimePort,
    ) -> EnumerationState {
        let next = match self.state {
            EnumerationState::Idle => self.on_idle(link, clock),
            EnumerationState::Scanning(p) => self.on_scanning(p, link),
            EnumerationState::Assigning(p) => self.on_assigning(p, link),
            EnumerationState::Verifying(p) => self.on_verifying(p, link, clock),
            EnumerationState::Failed(p) if !self.budget_exhausted => self.on_failed(p),
            terminal => terminal,
        };
        if next != self.state {
            debug!("Enum: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        next
    }

    // ── Per-state handlers ────────────────────────────────────

    /// Pulse the downstream line so every Slave drops any stale address,
    /// then enable node 1.
    fn on_idle(
        &mut self,
        link: &mut impl PresenceLine,
        clock: &mut impl TimePort,
    ) -> EnumerationState {
        link.set_downstream(false);
        clock.delay_ms(self.gate_settle_ms);
        link.set_downstream(true);
        clock.delay_ms(self.gate_settle_ms);
        EnumerationState::Scanning(1)
    }

    fn on_scanning(&mut self, position: u8, link: &mut impl BusPort) -> EnumerationState {
        if position <= self.max_nodes {
            return EnumerationState::Assigning(position);
        }
        // At the cap: one probe tells whether the chain goes on.
        let probe = Request::new(Command::HelloUnassigned);
        if transact(link, self.default_address, &probe, self.bus_timeout_ms).is_ok() {
            warn!("Enum: more than {} nodes present, table truncated", self.max_nodes);
            self.truncated = true;
        }
        EnumerationState::Done
    }

    fn on_assigning(&mut self, position: u8, link: &mut impl BusPort) -> EnumerationState {
        let address = self.address_base.saturating_add(position);
        if self.table.contains_address(address) {
            // Cannot happen with consecutive positions; refuse rather than
            // hand out an address twice.
            warn!("Enum: address 0x{:02x} already in table, stopping", address);
            return EnumerationState::Done;
        }

        let request = match Request::with_payload(Command::AssignAddress, &[address]) {
            Ok(r) => r,
            Err(_) => return EnumerationState::Done,
        };
        match transact(link, self.default_address, &request, self.bus_timeout_ms) {
            Ok(resp) if resp.payload.first() == Some(&address) => {
                debug!("Enum: position {} acknowledged 0x{:02x}", position, address);
                self.attempts = 0;
                EnumerationState::Verifying(position)
            }
            Err(BusError::Timeout) => {
                info!("Enum: no unassigned node at position {}, chain ends", position);
                EnumerationState::Done
            }
            Err(BusError::Collision) => {
                warn!("Enum: collision on default address, gating unreliable; aborting");
                self.budget_exhausted = true;
                EnumerationState::Failed(position)
            }
            other => {
                warn!("Enum: assign at position {} failed: {:?}", position, other.err());
                if !self.consume_retry() {
                    return EnumerationState::Failed(position);
                }
                self.attempts += 1;
                if self.attempts >= self.verify_retries {
                    // Node never took an address, so its downstream stays low.
                    self.attempts = 0;
                    self.record_unreachable(position);
                    return EnumerationState::Done;
                }
                EnumerationState::Assigning(position)
            }
        }
    }

    fn on_verifying(
        &mut self,
        position: u8,
        link: &mut impl BusPort,
        clock: &mut impl TimePort,
    ) -> EnumerationState {
        let address = self.address_base.saturating_add(position);
        if self.attempts > 0 {
            // The node may still be moving to its new address.
            clock.delay_ms(self.gate_settle_ms);
        }
        match transact(link, address, &Request::new(Command::Ping), self.bus_timeout_ms) {
            Ok(_) => {
                let record = NodeRecord {
                    assigned_address: address,
                    chain_position: position,
                    last_seen: clock.now_ms(),
                    healthy: true,
                };
                if let Err(e) = self.table.insert(record) {
                    warn!("Enum: {}", e);
                    return EnumerationState::Done;
                }
                info!("Enum: node {} online at 0x{:02x}", position, address);
                self.attempts = 0;
                // Let the node's downstream edge reach its neighbour.
                clock.delay_ms(self.gate_settle_ms);
                EnumerationState::Scanning(position.saturating_add(1))
            }
            Err(e) => {
                debug!("Enum: verify 0x{:02x} attempt {} failed: {}", address, self.attempts + 1, e);
                if !self.consume_retry() {
                    return EnumerationState::Failed(position);
                }
                self.attempts += 1;
                if self.attempts >= self.verify_retries {
                    EnumerationState::Failed(position)
                } else {
                    EnumerationState::Verifying(position)
                }
            }
        }
    }

    /// Record the position unreachable and decide whether to go on.
    fn on_failed(&mut self, position: u8) -> EnumerationState {
        let address = self.address_base.saturating_add(position);
        warn!("Enum: node {} (0x{:02x}) unreachable after {} attempts", position, address, self.attempts);
        self.attempts = 0;
        if !self.record_unreachable(position) || !self.continue_past_unreachable {
            return EnumerationState::Done;
        }
        EnumerationState::Scanning(position.saturating_add(1))
    }

    /// Table an unhealthy record at the position's intended address.
    fn record_unreachable(&mut self, position: u8) -> bool {
        self.unreachable.push(position);
        let record = NodeRecord {
            assigned_address: self.address_base.saturating_add(position),
            chain_position: position,
            last_seen: 0,
            healthy: false,
        };
        match self.table.insert(record) {
            Ok(()) => true,
            Err(e) => {
                warn!("Enum: {}", e);
                false
            }
        }
    }

    /// Spend one retry.  Returns `false` (and marks the run failed) once
    /// the budget is gone.
    fn consume_retry(&mut self) -> bool {
        if self.retries_used >= self.retry_budget {
            warn!("Enum: retry budget ({}) exhausted", self.retry_budget);
            self.budget_exhausted = true;
            return false;
        }
        self.retries_used += 1;
        true
    }
}
