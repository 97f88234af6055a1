//! Relay actuator bank.
//!
//! Maps a channel index to one output pin and remembers the last commanded
//! state of each channel.  Generic over `embedded_hal::digital::OutputPin`
//! so the same driver runs on [`GpioPin`](super::gpio::GpioPin) on target
//! and on recording mock pins in tests.
//!
//! ## Contract
//!
//! - Out-of-range channels are logged and ignored; nothing panics.
//! - The pin is written only when the state actually changes, so repeating
//!   a command costs no physical transition.
//! - A failed pin write leaves the remembered state untouched.
//! - Polarity is configuration only: `on` maps to the configured level.

use embedded_hal::digital::{OutputPin, PinState};
use log::{debug, error, warn};

use crate::config::RelayPolarity;
use crate::error::RelayError;

pub struct RelayBank<P: OutputPin> {
    pins: Vec<P>,
    states: Vec<bool>,
    polarity: RelayPolarity,
    transitions: u32,
}

impl<P: OutputPin> RelayBank<P> {
    /// Take ownership of `pins` (index = channel) and drive them all off.
    pub fn new(pins: Vec<P>, polarity: RelayPolarity) -> Self {
        let states = vec![false; pins.len()];
        let mut bank = Self {
            pins,
            states,
            polarity,
            transitions: 0,
        };
        bank.drive_all_off();
        bank
    }

    pub fn channel_count(&self) -> u8 {
        self.pins.len().min(usize::from(u8::MAX)) as u8
    }

    /// Set `channel` on or off.
    ///
    /// Returns `Ok(true)` if the pin was written, `Ok(false)` if the channel
    /// was already in the requested state.
    pub fn set_state(&mut self, channel: u8, on: bool) -> Result<bool, RelayError> {
        let idx = usize::from(channel);
        let Some(pin) = self.pins.get_mut(idx) else {
            warn!("Relay: channel {} out of range (have {}), ignored", channel, self.states.len());
            return Err(RelayError::ChannelOutOfRange(channel));
        };
        if self.states[idx] == on {
            return Ok(false);
        }
        let level = PinState::from(self.polarity.level_for(on));
        if pin.set_state(level).is_err() {
            error!("Relay: pin write failed on channel {}", channel);
            return Err(RelayError::PinWriteFailed(channel));
        }
        self.states[idx] = on;
        self.transitions = self.transitions.wrapping_add(1);
        debug!("Relay: channel {} -> {}", channel, if on { "ON" } else { "OFF" });
        Ok(true)
    }

    pub fn state(&self, channel: u8) -> Option<bool> {
        self.states.get(usize::from(channel)).copied()
    }

    pub fn states(&self) -> &[bool] {
        &self.states
    }

    /// Physical transitions performed since construction.
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Switch every channel off (through the normal change-only path).
    pub fn all_off(&mut self) {
        for ch in 0..self.channel_count() {
            let _ = self.set_state(ch, false);
        }
    }

    /// Borrow the pin behind `channel` (test inspection).
    pub fn pin(&self, channel: u8) -> Option<&P> {
        self.pins.get(usize::from(channel))
    }

    /// Unconditional write of the off level; used once at construction when
    /// the pin's power-on level is unknown.
    fn drive_all_off(&mut self) {
        let level = PinState::from(self.polarity.level_for(false));
        for (ch, pin) in self.pins.iter_mut().enumerate() {
            if pin.set_state(level).is_err() {
                error!("Relay: failed to drive channel {} off at init", ch);
            }
        }
    }
}
