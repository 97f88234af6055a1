//! Fixed-period loop timers.
//!
//! The control loop never blocks on time.  Each pass it asks the
//! [`LoopScheduler`] which work is due; the scheduler notifies a
//! [`LoopDelegate`] and the caller does the work.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    LoopScheduler.tick(now)                   │
//! │                                                              │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ sensor poll  │   │ node health  │   │ rules save       │  │
//! │  │ (periodic)   │   │ (periodic)   │   │ (debounced)      │  │
//! │  └──────┬───────┘   └──────┬───────┘   └────────┬─────────┘  │
//! │         ▼                  ▼                    ▼            │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                    LoopDelegate                        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All comparisons use `wrapping_sub`, so a wrapped millisecond counter
//! still measures elapsed time correctly.

use log::debug;

use crate::app::ports::{LoopDelegate, LoopTask};
use crate::config::SystemConfig;

// ═══════════════════════════════════════════════════════════════
//  Timers
// ═══════════════════════════════════════════════════════════════

/// Fires once every `interval_ms`, measured from the last fire.
#[derive(Debug, Clone, Copy)]
pub struct PeriodicTimer {
    interval_ms: u64,
    last: u64,
}

impl PeriodicTimer {
    /// Armed at `now`; first fire is one interval later.
    pub fn new(interval_ms: u64, now: u64) -> Self {
        Self {
            interval_ms,
            last: now,
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        now.wrapping_sub(self.last) >= self.interval_ms
    }

    /// If due, restart the period at `now` and return `true`.
    pub fn fire_if_due(&mut self, now: u64) -> bool {
        if self.is_due(now) {
            self.last = now;
            true
        } else {
            false
        }
    }

    /// Make the next `fire_if_due` succeed regardless of elapsed time.
    pub fn force(&mut self, now: u64) {
        self.last = now.wrapping_sub(self.interval_ms);
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }
}

/// Fires once, `quiet_ms` after the most recent `arm()`.
#[derive(Debug, Clone, Copy)]
pub struct Debounce {
    quiet_ms: u64,
    armed_at: Option<u64>,
}

impl Debounce {
    pub fn new(quiet_ms: u64) -> Self {
        Self {
            quiet_ms,
            armed_at: None,
        }
    }

    /// (Re)start the quiet period.
    pub fn arm(&mut self, now: u64) {
        self.armed_at = Some(now);
    }

    pub fn disarm(&mut self) {
        self.armed_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// If the quiet period has elapsed, disarm and return `true`.
    pub fn fire_if_due(&mut self, now: u64) -> bool {
        match self.armed_at {
            Some(t) if now.wrapping_sub(t) >= self.quiet_ms => {
                self.armed_at = None;
                true
            }
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Loop scheduler
// ═══════════════════════════════════════════════════════════════

pub struct LoopScheduler {
    sensor_poll: PeriodicTimer,
    node_health: PeriodicTimer,
    rules_save: Debounce,
}

impl LoopScheduler {
    pub fn new(config: &SystemConfig, now: u64) -> Self {
        Self {
            sensor_poll: PeriodicTimer::new(u64::from(config.sensor_poll_interval_ms), now),
            node_health: PeriodicTimer::new(u64::from(config.node_health_interval_ms), now),
            rules_save: Debounce::new(u64::from(config.rules_save_debounce_ms)),
        }
    }

    /// Notify `delegate` of every task due at `now`, in a fixed order:
    /// health before poll (so forwarding sees fresh node status), save last.
    pub fn tick(&mut self, now: u64, delegate: &mut dyn LoopDelegate) {
        if self.node_health.fire_if_due(now) {
            debug!("Scheduler: node health due");
            delegate.on_task_due(LoopTask::NodeHealth);
        }
        if self.sensor_poll.fire_if_due(now) {
            delegate.on_task_due(LoopTask::SensorPoll);
        }
        if self.rules_save.fire_if_due(now) {
            debug!("Scheduler: rules save due");
            delegate.on_task_due(LoopTask::RulesSave);
        }
    }

    /// A rule-set change happened; restart the save quiet period.
    pub fn rules_changed(&mut self, now: u64) {
        self.rules_save.arm(now);
    }

    /// Rules were saved out of band; nothing left to flush.
    pub fn rules_saved(&mut self) {
        self.rules_save.disarm();
    }

    pub fn save_pending(&self) -> bool {
        self.rules_save.is_armed()
    }

    /// Run the sensor poll on the next tick (e.g. right after boot).
    pub fn poll_now(&mut self, now: u64) {
        self.sensor_poll.force(now);
    }
}

/// Collects due tasks for callers that act after the scheduler returns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DueTasks {
    pub sensor_poll: bool,
    pub node_health: bool,
    pub rules_save: bool,
}

impl LoopDelegate for DueTasks {
    fn on_task_due(&mut self, task: LoopTask) {
        match task {
            LoopTask::SensorPoll => self.sensor_poll = true,
            LoopTask::NodeHealth => self.node_health = true,
            LoopTask::RulesSave => self.rules_save = true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
