//! Presence-detect line and boot-time role detection.
//!
//! Each node has one upstream input and one downstream output, wired
//! point-to-point along the chain:
//!
//! ```text
//!  Controller            Slave 1               Slave 2
//!  [in: idle]            [in ◀─────┐]          [in ◀─────┐]
//!  [out ───────────────▶ ]  [out ──┼──────────▶]  [out ──┼──▶ …
//!                                  └ gated until          └ gated until
//!                                    address adopted        address adopted
//! ```
//!
//! A node with nothing driving its upstream input is the Controller.

use log::info;

/// Access to this node's presence-detect pins.
pub trait PresenceLine {
    /// `true` while the upstream neighbour asserts our input.
    fn upstream_asserted(&mut self) -> bool;

    /// Assert or release our downstream output.
    fn set_downstream(&mut self, asserted: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Root of the chain: owns rules, API and enumeration.
    Controller,
    /// Addressed I/O node awaiting or holding a bus address.
    Slave,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Slave => "slave",
        }
    }
}

/// Sample the upstream input once and decide this node's role.
pub fn detect_role(line: &mut impl PresenceLine) -> Role {
    let role = if line.upstream_asserted() {
        Role::Slave
    } else {
        Role::Controller
    };
    info!("Presence: role = {}", role.as_str());
    role
}
