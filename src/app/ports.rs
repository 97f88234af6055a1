//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService / RuleEngine / Enumerator
//! ```
//!
//! Driven adapters (sensors, relays, bus, clock, storage, event sinks)
//! implement these traits.  The domain consumes them via generics, so the
//! rule engine and the enumeration state machine run unchanged against
//! real peripherals or host-side simulations.
//!
//! The bus and presence-line ports live in [`crate::bus`] next to the
//! protocol they carry.

use crate::app::events::AppEvent;
use crate::config::SystemConfig;
use crate::rules::{Rule, SensorSnapshot};
use crate::sensors::SensorReadings;

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: the domain calls this once per poll tick.
///
/// Must be cheap and non-blocking.  Readings that are unavailable are
/// omitted from the snapshot, never reported as sentinel values.
pub trait SensorPort {
    fn read_snapshot(&mut self) -> SensorSnapshot;

    /// Overlay externally supplied readings (boards without sensors fitted,
    /// bench testing).  Fields left `None` keep their current value.
    fn inject_readings(&mut self, readings: &SensorReadings);
}

// ───────────────────────────────────────────────────────────────
// Relay port (driven adapter: domain → local relay outputs)
// ───────────────────────────────────────────────────────────────

/// Write-side port for the relays physically attached to this node.
pub trait RelayPort {
    /// Drive `channel` on or off.  Out-of-range channels are ignored
    /// (logged only); repeated identical commands are no-ops.
    fn set_relay(&mut self, channel: u8, on: bool);

    /// Last commanded state of `channel`, `None` if out of range.
    fn relay_state(&self, channel: u8) -> Option<bool>;

    /// Number of channels on this node.
    fn channel_count(&self) -> u8;

    /// Drive every relay to its off level.
    fn all_off(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Time port (monotonic clock + blocking delay)
// ───────────────────────────────────────────────────────────────

/// Monotonic milliseconds since boot, plus a blocking delay used only by
/// the enumeration sequence (which legitimately blocks the loop).
pub trait TimePort {
    fn now_ms(&self) -> u64;
    fn delay_ms(&mut self, ms: u32);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Rule persistence port
// ───────────────────────────────────────────────────────────────

/// Loads and saves the ordered rule sequence.
///
/// Failures are never fatal: the service runs with an empty rule set
/// when loading fails, and keeps the in-memory set when saving fails.
pub trait RuleStore {
    fn load_rules(&self) -> Result<Vec<Rule>, StorageError>;
    fn save_rules(&mut self, rules: &[Rule]) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic: no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively.
pub trait StoragePort {
    /// Read a whole value, sized by the store.
    fn read(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed integrity / deserialization check.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] and [`RuleStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Value does not fit the backend (or the read buffer).
    TooLarge,
    /// Stored bytes could not be decoded.
    Corrupted,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::TooLarge => write!(f, "value too large"),
            Self::Corrupted => write!(f, "stored value corrupted"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (scheduler → caller)
// ───────────────────────────────────────────────────────────────

/// Work items the loop scheduler can find due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTask {
    /// Capture a sensor snapshot and run one rule tick.
    SensorPoll,
    /// Ping every known Slave.
    NodeHealth,
    /// Persist a changed rule set.
    RulesSave,
}

/// Receives due-task notifications from [`crate::scheduler::LoopScheduler`].
pub trait LoopDelegate {
    fn on_task_due(&mut self, task: LoopTask);
}
