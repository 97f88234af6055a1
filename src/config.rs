//! System configuration parameters
//!
//! All tunable parameters for the TerraHub controller and its slave chain.
//! Values can be overridden via NVS (non-volatile storage) and are
//! validated by [`validate_config`] before they are ever persisted.

use serde::{Deserialize, Serialize};

use log::warn;

use crate::app::ports::{ConfigError, ConfigPort};

/// Highest usable 7-bit bus address (0x78..=0x7F are reserved).
pub const MAX_BUS_ADDRESS: u8 = 0x77;

/// Electrical level that energises a relay coil.
///
/// Differs between relay module revisions; the driver logic never
/// branches on it beyond translating on/off into a pin level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayPolarity {
    ActiveHigh,
    ActiveLow,
}

impl RelayPolarity {
    /// Pin level (true = high) that produces the requested relay state.
    pub const fn level_for(self, on: bool) -> bool {
        match self {
            Self::ActiveHigh => on,
            Self::ActiveLow => !on,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Relays ---
    /// Number of relay output channels on this node.
    pub relay_channel_count: u8,
    /// Pin level that switches a relay on.
    pub relay_polarity: RelayPolarity,

    // --- Bus addressing ---
    /// Address every unassigned slave listens on.
    pub default_address: u8,
    /// Assigned address = `address_base + chain_position`.
    pub address_base: u8,
    /// Largest chain the controller will enumerate.
    pub max_nodes: u8,

    // --- Enumeration ---
    /// Per-transaction bus timeout (milliseconds).
    pub bus_timeout_ms: u32,
    /// Time for a presence-detect edge to propagate and the gated node to
    /// start listening (milliseconds).
    pub gate_settle_ms: u32,
    /// Ping attempts at a freshly assigned address before giving up.
    pub verify_retries: u8,
    /// Total retries one enumeration run may spend across all positions.
    pub retry_budget: u8,
    /// Keep scanning past a node that took an address but never verified.
    pub continue_past_unreachable: bool,
    /// Presence-detect lines idle high via pull-up; asserted = driven low.
    pub presence_active_low: bool,

    // --- Timing ---
    /// Sensor poll + rule evaluation period (milliseconds).
    pub sensor_poll_interval_ms: u32,
    /// Slave health probe period (milliseconds).
    pub node_health_interval_ms: u32,
    /// Quiet time after a rule-set change before it is written to NVS.
    pub rules_save_debounce_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Relays
            relay_channel_count: 5,
            relay_polarity: RelayPolarity::ActiveHigh,

            // Bus
            default_address: 0x30,
            address_base: 0x30,
            max_nodes: 16,

            // Enumeration
            bus_timeout_ms: 50,
            gate_settle_ms: 20,
            verify_retries: 3,
            retry_budget: 16,
            continue_past_unreachable: false,
            presence_active_low: true,

            // Timing
            sensor_poll_interval_ms: 1000,  // 1 Hz
            node_health_interval_ms: 30_000,
            rules_save_debounce_ms: 5000,
        }
    }
}

impl SystemConfig {
    /// Bus address handed to the node at `position` (1-based).
    pub fn address_for(&self, position: u8) -> u8 {
        self.address_base.saturating_add(position)
    }
}

/// Range-check every field.  Invalid values are rejected, never clamped.
pub fn validate_config(cfg: &SystemConfig) -> Result<(), ConfigError> {
    if !(1..=8).contains(&cfg.relay_channel_count) {
        return Err(ConfigError::ValidationFailed(
            "relay_channel_count must be 1–8",
        ));
    }
    if cfg.max_nodes == 0 {
        return Err(ConfigError::ValidationFailed("max_nodes must be at least 1"));
    }
    if u16::from(cfg.address_base) + u16::from(cfg.max_nodes) > u16::from(MAX_BUS_ADDRESS) {
        return Err(ConfigError::ValidationFailed(
            "address_base + max_nodes must stay within 7-bit addressing",
        ));
    }
    if cfg.default_address > cfg.address_base
        && cfg.default_address <= cfg.address_base + cfg.max_nodes
    {
        return Err(ConfigError::ValidationFailed(
            "default_address must not collide with an assignable address",
        ));
    }
    if cfg.bus_timeout_ms == 0 || cfg.bus_timeout_ms > 1000 {
        return Err(ConfigError::ValidationFailed("bus_timeout_ms must be 1–1000"));
    }
    if cfg.verify_retries == 0 {
        return Err(ConfigError::ValidationFailed("verify_retries must be at least 1"));
    }
    if !(100..=60_000).contains(&cfg.sensor_poll_interval_ms) {
        return Err(ConfigError::ValidationFailed(
            "sensor_poll_interval_ms must be 100–60000",
        ));
    }
    if cfg.node_health_interval_ms < cfg.sensor_poll_interval_ms {
        return Err(ConfigError::ValidationFailed(
            "node_health_interval_ms must not be shorter than the poll interval",
        ));
    }
    Ok(())
}

/// Load the persisted config, falling back to defaults on any failure.
pub fn load_or_default(port: &impl ConfigPort) -> SystemConfig {
    match port.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Config: load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    }
}
