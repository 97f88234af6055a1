//! Node Table — the Controller's view of the chain.
//!
//! Ordered by chain position.  Position 0 is the Controller itself and is
//! never stored, so `records()[i].chain_position == i + 1`.

use core::fmt;

use serde::Serialize;

/// One Slave discovered during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub assigned_address: u8,
    pub chain_position: u8,
    /// Monotonic ms of the last successful exchange.
    pub last_seen: u64,
    pub healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// Address already held by another record.
    DuplicateAddress(u8),
    /// Position is not the next one in sequence.
    OutOfOrder { expected: u8, got: u8 },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateAddress(a) => write!(f, "address 0x{a:02x} already assigned"),
            Self::OutOfOrder { expected, got } => {
                write!(f, "position {got} out of order (expected {expected})")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodeTable {
    records: Vec<NodeRecord>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Position the next appended record must carry.
    pub fn next_position(&self) -> u8 {
        self.records.len() as u8 + 1
    }

    /// Append a record; addresses stay unique and positions consecutive.
    pub fn insert(&mut self, record: NodeRecord) -> Result<(), TableError> {
        let expected = self.next_position();
        if record.chain_position != expected {
            return Err(TableError::OutOfOrder {
                expected,
                got: record.chain_position,
            });
        }
        if self.contains_address(record.assigned_address) {
            return Err(TableError::DuplicateAddress(record.assigned_address));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn contains_address(&self, address: u8) -> bool {
        self.records.iter().any(|r| r.assigned_address == address)
    }

    pub fn get(&self, position: u8) -> Option<&NodeRecord> {
        usize::from(position)
            .checked_sub(1)
            .and_then(|i| self.records.get(i))
    }

    pub fn address_of(&self, position: u8) -> Option<u8> {
        self.get(position).map(|r| r.assigned_address)
    }

    /// Record a successful exchange.  Returns `false` for unknown positions.
    pub fn mark_seen(&mut self, position: u8, now: u64) -> bool {
        match self.get_mut(position) {
            Some(r) => {
                r.last_seen = now;
                r.healthy = true;
                true
            }
            None => false,
        }
    }

    /// Flag a node unreachable.  Returns `true` if it was healthy before.
    pub fn mark_unreachable(&mut self, position: u8) -> bool {
        match self.get_mut(position) {
            Some(r) => core::mem::replace(&mut r.healthy, false),
            None => false,
        }
    }

    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.records.iter().filter(|r| r.healthy).count()
    }

    fn get_mut(&mut self, position: u8) -> Option<&mut NodeRecord> {
        usize::from(position)
            .checked_sub(1)
            .and_then(|i| self.records.get_mut(i))
    }
}
