//! Hardware adapter — bridges the node's own peripherals to domain ports.
//!
//! Owns the [`RelayBank`] and the [`SensorHub`], exposing them through
//! [`RelayPort`] and [`SensorPort`].  Generic over the relay pin type so
//! the same adapter serves the real board
//! ([`GpioPin`](crate::drivers::gpio::GpioPin)) and the simulated chain.

use embedded_hal::digital::OutputPin;

use crate::app::ports::{RelayPort, SensorPort};
use crate::config::SystemConfig;
use crate::drivers::relay::RelayBank;
use crate::rules::SensorSnapshot;
use crate::sensors::{SensorHub, SensorReadings};

/// Concrete adapter that combines local relays and sensors behind ports.
pub struct HardwareAdapter<P: OutputPin> {
    relays: RelayBank<P>,
    sensors: SensorHub,
}

impl<P: OutputPin> HardwareAdapter<P> {
    pub fn new(relays: RelayBank<P>, sensors: SensorHub) -> Self {
        Self { relays, sensors }
    }

    /// Build from config: the first `relay_channel_count` pins become
    /// channels, extra pins are dropped.
    pub fn from_pins(mut pins: Vec<P>, config: &SystemConfig) -> Self {
        pins.truncate(usize::from(config.relay_channel_count));
        Self::new(RelayBank::new(pins, config.relay_polarity), SensorHub::new())
    }

    pub fn relays(&self) -> &RelayBank<P> {
        &self.relays
    }

    pub fn sensors(&self) -> &SensorHub {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut SensorHub {
        &mut self.sensors
    }
}

// ── SensorPort implementation ─────────────────────────────────

impl<P: OutputPin> SensorPort for HardwareAdapter<P> {
    fn read_snapshot(&mut self) -> SensorSnapshot {
        self.sensors.read_snapshot()
    }

    fn inject_readings(&mut self, readings: &SensorReadings) {
        self.sensors.inject(readings);
    }
}

// ── RelayPort implementation ──────────────────────────────────

impl<P: OutputPin> RelayPort for HardwareAdapter<P> {
    fn set_relay(&mut self, channel: u8, on: bool) {
        // Failures are logged by the bank; the port contract absorbs them.
        let _ = self.relays.set_state(channel, on);
    }

    fn relay_state(&self, channel: u8) -> Option<bool> {
        self.relays.state(channel)
    }

    fn channel_count(&self) -> u8 {
        self.relays.channel_count()
    }

    fn all_off(&mut self) {
        self.relays.all_off();
    }
}
