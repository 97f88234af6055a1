//! Application service — the Controller's hexagonal core.
//!
//! [`AppService`] owns the rule engine, the Node Table and the loop
//! scheduler.  It exposes a clean, hardware-agnostic API.  All I/O flows
//! through port traits injected at call sites, making the entire service
//! testable against the simulated chain.
//!
//! ```text
//!  SensorPort ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                 │        AppService         │
//!   RelayPort ◀── │  Rules · Nodes · Timers   │ ◀─▶ BusPort (+ PresenceLine)
//!                 └──────────────────────────┘
//! ```

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::Serialize;

use crate::bus::{self, BusPort, Command, PresenceLine, Request};
use crate::config::SystemConfig;
use crate::enumeration::{EnumerationReport, Enumerator, NodeTable, Outcome};
use crate::error::{BusError, Error, RelayError};
use crate::rules::{RuleEngine, SensorSnapshot};
use crate::scheduler::{DueTasks, LoopScheduler};

use super::commands::AppCommand;
use super::events::{ActuationSource, AppEvent};
use super::ports::{EventSink, RelayPort, RuleStore, SensorPort, TimePort};

// ───────────────────────────────────────────────────────────────
// Status report
// ───────────────────────────────────────────────────────────────

/// One held rule lock, as shown by the status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub rule_id: String,
    pub lock_until: u64,
    pub node: u8,
    pub channel: u8,
    pub on: bool,
}

/// Result of the last enumeration run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerationStatus {
    pub outcome: &'static str,
    pub truncated: bool,
    pub unreachable: Vec<u8>,
    pub retries_used: u8,
}

/// Everything the Administrative API reports under `/api/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub version: &'static str,
    pub role: &'static str,
    pub relays: Vec<bool>,
    pub sensors: SensorSnapshot,
    pub rule_count: usize,
    pub active_locks: Vec<LockStatus>,
    pub nodes: NodeTable,
    pub enumeration: Option<EnumerationStatus>,
    pub uptime_ms: u64,
}

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all Controller-side logic.
pub struct AppService {
    config: SystemConfig,
    engine: RuleEngine,
    enumerator: Enumerator,
    nodes: NodeTable,
    last_report: Option<EnumerationReport>,
    /// Last acknowledged Slave relay states, keyed by (position, channel).
    remote_relays: BTreeMap<(u8, u8), bool>,
    scheduler: LoopScheduler,
    last_snapshot: SensorSnapshot,
    last_poll_ms: u64,
    topology_changed: bool,
    reenumerate_requested: bool,
    save_due: bool,
    tick_count: u64,
}

impl AppService {
    /// Construct the service.  The first sensor poll is due immediately.
    pub fn new(config: SystemConfig, now: u64) -> Self {
        let mut scheduler = LoopScheduler::new(&config, now);
        scheduler.poll_now(now);
        Self {
            enumerator: Enumerator::new(&config),
            engine: RuleEngine::default(),
            nodes: NodeTable::new(),
            last_report: None,
            remote_relays: BTreeMap::new(),
            scheduler,
            last_snapshot: SensorSnapshot::new(),
            last_poll_ms: now,
            topology_changed: false,
            reenumerate_requested: false,
            save_due: false,
            tick_count: 0,
            config,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Load the persisted rule set.  A load failure starts with no rules.
    pub fn start(&mut self, store: &impl RuleStore, sink: &mut impl EventSink) {
        let rules = match store.load_rules() {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Rules: load failed ({}), starting with an empty set", e);
                Vec::new()
            }
        };
        self.engine.replace_rules(rules);
        let rule_count = self.engine.rules().len();
        info!("AppService started with {} rule(s)", rule_count);
        sink.emit(&AppEvent::Started { rule_count });
    }

    /// Rebuild the Node Table.  Blocks for the whole run.
    pub fn enumerate(
        &mut self,
        link: &mut (impl BusPort + PresenceLine),
        clock: &mut impl TimePort,
        sink: &mut impl EventSink,
    ) -> Outcome {
        let report = self.enumerator.run(link, clock);
        self.nodes = report.table.clone();
        self.remote_relays.clear();
        self.topology_changed = false;
        self.reenumerate_requested = false;
        sink.emit(&AppEvent::EnumerationFinished {
            outcome: report.outcome,
            nodes: report.table.len(),
            unreachable: report.unreachable.len(),
            truncated: report.truncated,
        });
        let outcome = report.outcome;
        self.last_report = Some(report);
        outcome
    }

    /// Re-run enumeration if a topology change was seen or one was
    /// requested.  Returns `true` if it ran.
    pub fn reenumerate_if_needed(
        &mut self,
        link: &mut (impl BusPort + PresenceLine),
        clock: &mut impl TimePort,
        sink: &mut impl EventSink,
    ) -> bool {
        if !self.needs_enumeration() {
            return false;
        }
        info!(
            "Enum: re-running (topology_changed={}, requested={})",
            self.topology_changed, self.reenumerate_requested
        );
        self.enumerate(link, clock, sink);
        true
    }

    pub fn needs_enumeration(&self) -> bool {
        self.topology_changed || self.reenumerate_requested
    }

    // ── Per-pass orchestration ────────────────────────────────

    /// One pass of the cooperative loop: run whatever the scheduler says
    /// is due.  Health checks run before the rule tick so forwarding sees
    /// fresh node status.
    pub fn poll(
        &mut self,
        now: u64,
        hw: &mut (impl SensorPort + RelayPort),
        bus: &mut impl BusPort,
        sink: &mut impl EventSink,
    ) {
        let mut due = DueTasks::default();
        self.scheduler.tick(now, &mut due);

        if due.node_health {
            self.check_nodes(now, bus, sink);
        }
        if due.sensor_poll {
            self.run_rules(now, hw, bus, sink);
        }
        if due.rules_save {
            self.save_due = true;
        }
    }

    /// Capture a snapshot, tick the engine and route every actuation.
    fn run_rules(
        &mut self,
        now: u64,
        hw: &mut (impl SensorPort + RelayPort),
        bus: &mut impl BusPort,
        sink: &mut impl EventSink,
    ) {
        self.tick_count += 1;
        self.last_poll_ms = now;
        let snapshot = hw.read_snapshot();
        let report = self.engine.tick(now, &snapshot);
        self.last_snapshot = snapshot;

        for act in &report.actuations {
            if let Err(e) = self.route(now, act.node, act.channel, act.on, ActuationSource::Rule, hw, bus, sink) {
                warn!(
                    "Rules: '{}' could not switch node {} ch {}: {}",
                    act.rule_id, act.node, act.channel, e
                );
                // A Slave that missed its release keeps the lock until it answers.
                if act.node != 0 {
                    if let Some(lock) = report.released.iter().find(|l| l.rule_id == act.rule_id) {
                        self.engine.restore_lock(lock.clone());
                    }
                }
            }
        }

        if !report.actuations.is_empty() || report.locks_created > 0 || report.locks_released > 0 {
            sink.emit(&AppEvent::RuleTick {
                actuations: report.actuations.len(),
                locks_created: report.locks_created,
                locks_released: report.locks_released,
            });
        } else {
            debug!("Rules: tick {} idle ({} skipped)", self.tick_count, report.rules_skipped);
        }
    }

    /// Drive one relay, locally (`node == 0`) or on a Slave.
    #[allow(clippy::too_many_arguments)]
    fn route(
        &mut self,
        now: u64,
        node: u8,
        channel: u8,
        on: bool,
        source: ActuationSource,
        hw: &mut impl RelayPort,
        bus: &mut impl BusPort,
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        if node == 0 {
            if channel >= hw.channel_count() {
                return Err(RelayError::ChannelOutOfRange(channel).into());
            }
            let before = hw.relay_state(channel);
            hw.set_relay(channel, on);
            if before != Some(on) && hw.relay_state(channel) == Some(on) {
                sink.emit(&AppEvent::RelayChanged { node, channel, on, source });
            }
            return Ok(());
        }

        let record = self
            .nodes
            .get(node)
            .filter(|r| r.healthy)
            .copied()
            .ok_or(RelayError::UnknownNode(node))?;
        let request =
            Request::with_payload(Command::SetPortState, &[channel, u8::from(on)]).map_err(BusError::from)?;

        match bus::transact(bus, record.assigned_address, &request, self.config.bus_timeout_ms) {
            Ok(ack) => {
                self.nodes.mark_seen(node, now);
                let state = match ack.payload.as_slice() {
                    [ch, s] if *ch == channel => *s != 0,
                    _ => on,
                };
                if self.remote_relays.insert((node, channel), state) != Some(state) {
                    sink.emit(&AppEvent::RelayChanged { node, channel, on: state, source });
                }
                Ok(())
            }
            Err(BusError::Timeout) => {
                if self.nodes.mark_unreachable(node) {
                    sink.emit(&AppEvent::NodeUnreachable {
                        position: node,
                        address: record.assigned_address,
                    });
                }
                Err(BusError::Timeout.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ping every known node.  A healthy node going quiet, or a new node
    /// answering at the default address, is a topology change.
    fn check_nodes(&mut self, now: u64, bus: &mut impl BusPort, sink: &mut impl EventSink) {
        let ping = Request::new(Command::Ping);
        let records: Vec<_> = self.nodes.records().to_vec();

        for record in records {
            let position = record.chain_position;
            let address = record.assigned_address;
            match bus::transact(bus, address, &ping, self.config.bus_timeout_ms) {
                Ok(_) => {
                    self.nodes.mark_seen(position, now);
                    if !record.healthy {
                        info!("Node {} (0x{:02x}) answering again", position, address);
                        sink.emit(&AppEvent::NodeRecovered { position, address });
                    }
                }
                Err(e) => {
                    if self.nodes.mark_unreachable(position) {
                        warn!("Node {} (0x{:02x}) failed health check: {}", position, address, e);
                        sink.emit(&AppEvent::NodeUnreachable { position, address });
                        self.flag_topology_change(sink);
                    }
                }
            }
        }

        if self.chain_end_is_open() {
            let hello = Request::new(Command::HelloUnassigned);
            if bus::transact(bus, self.config.default_address, &hello, self.config.bus_timeout_ms).is_ok() {
                info!("Enum: unassigned node answered at the chain end");
                self.flag_topology_change(sink);
            }
        }
    }

    /// The last run ended because nobody answered past the final node, so
    /// an answer at the default address can only be a newly attached node.
    fn chain_end_is_open(&self) -> bool {
        match &self.last_report {
            Some(r) => {
                r.outcome == Outcome::Done
                    && !r.truncated
                    && r.unreachable.is_empty()
                    && self.nodes.healthy_count() == self.nodes.len()
            }
            None => false,
        }
    }

    fn flag_topology_change(&mut self, sink: &mut impl EventSink) {
        if !self.topology_changed {
            self.topology_changed = true;
            sink.emit(&AppEvent::TopologyChanged);
        }
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command (Administrative API, console).
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        now: u64,
        hw: &mut (impl SensorPort + RelayPort),
        bus: &mut impl BusPort,
        sink: &mut impl EventSink,
    ) -> Result<(), Error> {
        match cmd {
            AppCommand::ReplaceRules(rules) => {
                self.engine.replace_rules(rules);
                let count = self.engine.rules().len();
                self.scheduler.rules_changed(now);
                info!("Rules: replaced with {} rule(s)", count);
                sink.emit(&AppEvent::RulesReplaced { count });
            }
            AppCommand::SetRelay { node, channel, on } => {
                info!("Relay: manual node {} ch {} -> {}", node, channel, on);
                self.route(now, node, channel, on, ActuationSource::Manual, hw, bus, sink)?;
            }
            AppCommand::InjectSensorReadings(readings) => {
                hw.inject_readings(&readings);
            }
            AppCommand::Reenumerate => {
                self.reenumerate_requested = true;
            }
            AppCommand::SaveRules => {
                self.save_due = true;
                info!("Rules: explicit save requested (will flush on next auto-save check)");
            }
        }
        Ok(())
    }

    // ── Persistence ───────────────────────────────────────────

    /// Flush the rule set if a save is due.  A failed save keeps the
    /// in-memory rules and retries after another quiet period.
    pub fn auto_save_if_needed(
        &mut self,
        now: u64,
        store: &mut impl RuleStore,
        sink: &mut impl EventSink,
    ) -> bool {
        if !self.save_due {
            return false;
        }
        self.save_due = false;
        match store.save_rules(self.engine.rules()) {
            Ok(()) => {
                self.scheduler.rules_saved();
                let count = self.engine.rules().len();
                info!("Rules: saved {} rule(s)", count);
                sink.emit(&AppEvent::RulesSaved { count });
                true
            }
            Err(e) => {
                warn!("Rules: save failed: {}", e);
                self.scheduler.rules_changed(now);
                sink.emit(&AppEvent::RulesSaveFailed(e));
                false
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self, hw: &impl RelayPort) -> StatusReport {
        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            role: bus::Role::Controller.as_str(),
            relays: (0..hw.channel_count())
                .map(|ch| hw.relay_state(ch).unwrap_or(false))
                .collect(),
            sensors: self.last_snapshot.clone(),
            rule_count: self.engine.rules().len(),
            active_locks: self
                .engine
                .locks()
                .iter()
                .map(|l| LockStatus {
                    rule_id: l.rule_id.clone(),
                    lock_until: l.lock_until,
                    node: l.action.node,
                    channel: l.action.channel,
                    on: l.action.turn_on,
                })
                .collect(),
            nodes: self.nodes.clone(),
            enumeration: self.last_report.as_ref().map(|r| EnumerationStatus {
                outcome: match r.outcome {
                    Outcome::Done => "done",
                    Outcome::Failed => "failed",
                },
                truncated: r.truncated,
                unreachable: r.unreachable.clone(),
                retries_used: r.retries_used,
            }),
            uptime_ms: self.last_poll_ms,
        }
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn last_report(&self) -> Option<&EnumerationReport> {
        self.last_report.as_ref()
    }

    pub fn last_snapshot(&self) -> &SensorSnapshot {
        &self.last_snapshot
    }

    /// Sensor poll ticks executed since startup.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn is_save_due(&self) -> bool {
        self.save_due || self.scheduler.save_pending()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }
}
