//! Mock hardware for integration tests.
//!
//! Records every level written to a relay pin so tests can assert on the
//! physical history (glitches, polarity) without touching real GPIO.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::digital::{ErrorType, OutputPin};
use terrahub::adapters::hardware::HardwareAdapter;
use terrahub::app::events::AppEvent;
use terrahub::app::ports::{EventSink, RuleStore, StorageError};
use terrahub::config::SystemConfig;
use terrahub::rules::Rule;

// ── RecordingPin ──────────────────────────────────────────────

/// Output pin whose writes land in a log shared with the test.
#[derive(Clone, Default)]
pub struct RecordingPin {
    levels: Rc<RefCell<Vec<bool>>>,
}

#[allow(dead_code)]
impl RecordingPin {
    pub fn writes(&self) -> Vec<bool> {
        self.levels.borrow().clone()
    }

    pub fn level(&self) -> Option<bool> {
        self.levels.borrow().last().copied()
    }
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut().push(true);
        Ok(())
    }
}

/// A relay board whose pins stay observable after being handed over.
pub fn recording_board(config: &SystemConfig) -> (HardwareAdapter<RecordingPin>, Vec<RecordingPin>) {
    let pins: Vec<RecordingPin> = (0..config.relay_channel_count)
        .map(|_| RecordingPin::default())
        .collect();
    (HardwareAdapter::from_pins(pins.clone(), config), pins)
}

// ── EventLog ──────────────────────────────────────────────────

#[derive(Default)]
pub struct EventLog {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl EventLog {
    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── MemRuleStore ──────────────────────────────────────────────

#[derive(Default)]
pub struct MemRuleStore {
    pub rules: Option<Vec<Rule>>,
    pub saves: usize,
}

impl RuleStore for MemRuleStore {
    fn load_rules(&self) -> Result<Vec<Rule>, StorageError> {
        self.rules.clone().ok_or(StorageError::NotFound)
    }

    fn save_rules(&mut self, rules: &[Rule]) -> Result<(), StorageError> {
        self.saves += 1;
        self.rules = Some(rules.to_vec());
        Ok(())
    }
}
