//! Presence-detect adapter over two GPIOs (SYNC_IN / SYNC_OUT).
//!
//! The upstream input idles through a pull-up; with the default
//! active-low wiring a neighbour asserts it by pulling it low.  Generic
//! over `embedded-hal` pins so the host tests drive it with
//! [`GpioPin`](crate::drivers::gpio::GpioPin) in simulation mode.

use embedded_hal::digital::{InputPin, OutputPin};
use log::warn;

use crate::bus::PresenceLine;

pub struct PresenceGpio<I: InputPin, O: OutputPin> {
    upstream: I,
    downstream: O,
    active_low: bool,
    asserted: bool,
}

impl<I: InputPin, O: OutputPin> PresenceGpio<I, O> {
    /// Wrap the pins and release the downstream line.
    pub fn new(upstream: I, downstream: O, active_low: bool) -> Self {
        let mut line = Self {
            upstream,
            downstream,
            active_low,
            asserted: true,
        };
        line.set_downstream(false);
        line
    }

    pub fn downstream_asserted(&self) -> bool {
        self.asserted
    }

    pub fn release(self) -> (I, O) {
        (self.upstream, self.downstream)
    }
}

impl<I: InputPin, O: OutputPin> PresenceLine for PresenceGpio<I, O> {
    fn upstream_asserted(&mut self) -> bool {
        match self.upstream.is_high() {
            Ok(high) => high != self.active_low,
            Err(_) => {
                warn!("Presence: upstream read failed, treating as released");
                false
            }
        }
    }

    fn set_downstream(&mut self, asserted: bool) {
        let high = asserted != self.active_low;
        let res = if high {
            self.downstream.set_high()
        } else {
            self.downstream.set_low()
        };
        match res {
            Ok(()) => self.asserted = asserted,
            Err(_) => warn!("Presence: downstream write failed"),
        }
    }
}
