//! Host-side simulated chain of Slave nodes.
//!
//! Each simulated node runs the real [`SlaveNode`] protocol state on top
//! of a real [`HardwareAdapter`] with in-memory pins.  Presence lines are
//! wired exactly like the board: the Controller's downstream output feeds
//! node 1's upstream input, node 1's downstream feeds node 2, and so on.
//! Only nodes whose upstream is asserted see bus traffic, so the gating
//! that makes enumeration unambiguous is reproduced, not assumed.
//!
//! Two nodes answering the same address yield [`BusError::Collision`].

use log::debug;

use crate::adapters::hardware::HardwareAdapter;
use crate::config::SystemConfig;
use crate::drivers::gpio::GpioPin;
use crate::error::BusError;

use super::codec::Frame;
use super::presence::PresenceLine;
use super::slave::{NodeIdentity, SlaveNode};
use super::BusPort;

/// Injected misbehaviour for one simulated node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SimFault {
    #[default]
    None,
    /// Never answers and never gates its downstream neighbour.
    Silent,
    /// Acknowledges its address assignment (and enables downstream), then
    /// never answers at the new address.
    DeafAfterAssign,
}

pub struct SimNode {
    pub slave: SlaveNode,
    pub board: HardwareAdapter<GpioPin>,
    pub fault: SimFault,
}

impl SimNode {
    fn new(config: &SystemConfig) -> Self {
        Self {
            slave: SlaveNode::new(config, NodeIdentity::from_build(1, 0)),
            board: HardwareAdapter::from_pins(GpioPin::relay_outputs(), config),
            fault: SimFault::None,
        }
    }

    fn answers(&self, address: u8) -> bool {
        if !self.slave.accepts(address) {
            return false;
        }
        match self.fault {
            SimFault::None => true,
            SimFault::Silent => false,
            SimFault::DeafAfterAssign => self.slave.assigned_address().is_none(),
        }
    }
}

/// One bus transaction as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub address: u8,
    pub command: u8,
    pub answered: bool,
}

pub struct SimulatedChain {
    config: SystemConfig,
    controller_downstream: bool,
    nodes: Vec<SimNode>,
    transactions: Vec<Transaction>,
}

impl SimulatedChain {
    /// A chain of `count` fresh, unassigned nodes.
    pub fn new(config: &SystemConfig, count: usize) -> Self {
        Self {
            config: config.clone(),
            controller_downstream: false,
            nodes: (0..count).map(|_| SimNode::new(config)).collect(),
            transactions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at chain `position` (1-based, matching the Node Table).
    pub fn node(&self, position: usize) -> Option<&SimNode> {
        position.checked_sub(1).and_then(|i| self.nodes.get(i))
    }

    pub fn node_mut(&mut self, position: usize) -> Option<&mut SimNode> {
        position.checked_sub(1).and_then(|i| self.nodes.get_mut(i))
    }

    pub fn set_fault(&mut self, position: usize, fault: SimFault) {
        if let Some(node) = self.node_mut(position) {
            node.fault = fault;
        }
    }

    /// Unplug everything from `position` onward.
    pub fn disconnect_from(&mut self, position: usize) {
        self.nodes.truncate(position.saturating_sub(1));
        self.propagate();
    }

    /// Plug a fresh node onto the end of the chain.
    pub fn attach(&mut self) {
        self.nodes.push(SimNode::new(&self.config));
        self.propagate();
    }

    pub fn assigned_addresses(&self) -> Vec<Option<u8>> {
        self.nodes.iter().map(|n| n.slave.assigned_address()).collect()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn clear_transactions(&mut self) {
        self.transactions.clear();
    }

    /// Settle every presence line from the Controller outward.
    fn propagate(&mut self) {
        let mut upstream = self.controller_downstream;
        for node in &mut self.nodes {
            node.slave.set_upstream(upstream);
            upstream = node.slave.downstream_asserted();
        }
    }
}

impl BusPort for SimulatedChain {
    fn send(&mut self, address: u8, request: &[u8], _timeout_ms: u32) -> Result<Frame, BusError> {
        self.propagate();
        let command = request.first().copied().unwrap_or(0);

        let mut responders = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.answers(address))
            .map(|(i, _)| i);
        let first = responders.next();
        let collision = responders.next().is_some();

        let result = match (first, collision) {
            (None, _) => Err(BusError::Timeout),
            (Some(_), true) => Err(BusError::Collision),
            (Some(i), false) => {
                let node = &mut self.nodes[i];
                let frame = node.slave.handle_frame(request, 0, &mut node.board);
                if frame.is_empty() {
                    Err(BusError::Timeout)
                } else {
                    Ok(frame)
                }
            }
        };

        debug!(
            "SimBus: 0x{:02x} cmd=0x{:02x} -> {:?}",
            address,
            command,
            result.as_ref().map(|f| f.first().copied())
        );
        self.transactions.push(Transaction {
            address,
            command,
            answered: result.is_ok(),
        });
        self.propagate();
        result
    }
}

impl PresenceLine for SimulatedChain {
    /// The simulated Controller is always the root.
    fn upstream_asserted(&mut self) -> bool {
        false
    }

    fn set_downstream(&mut self, asserted: bool) {
        self.controller_downstream = asserted;
        self.propagate();
    }
}
