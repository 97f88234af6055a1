//! Rule Evaluation Engine.
//!
//! Turns a [`SensorSnapshot`] into an ordered list of relay actuations,
//! enforcing each rule's minimum-hold window through [`ActiveLock`]s.
//!
//! ```text
//!               condition true                 condition false, now ≥ lock_until
//!  (no lock) ─────────────────────▶ (locked) ─────────────────────────────────▶ (no lock)
//!                 drive desired        │  ▲        drive inverse
//!                                      └──┘
//!                         condition true: re-drive desired
//!                         condition false, now < lock_until: hold
//! ```
//!
//! The engine owns the rule set and the lock set and performs no I/O: the
//! caller applies [`TickReport::actuations`] in order, so when two rules
//! target the same channel the later rule's write lands last.
//!
//! A lock whose rule is still enabled and evaluable stays in place after
//! `lock_until` until the condition is seen false, which is what lets the
//! inverse actuation happen.  Only locks orphaned by a disabled or removed
//! rule are dropped purely on time.

use log::{debug, info, warn};

use super::{Rule, RuleAction, SensorSnapshot};

/// Minimum-hold bookkeeping for one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLock {
    pub rule_id: String,
    /// Monotonic ms timestamp before which the action may not be reversed.
    pub lock_until: u64,
    /// The action that was driven when the lock was taken.
    pub action: RuleAction,
}

/// One relay write requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actuation {
    pub rule_id: String,
    /// Chain position owning the relay (0 = local).
    pub node: u8,
    pub channel: u8,
    pub on: bool,
}

/// What one tick did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub actuations: Vec<Actuation>,
    pub locks_created: usize,
    pub locks_released: usize,
    /// Orphaned locks dropped on time alone.
    pub locks_expired: usize,
    /// Locks released this tick, one per inverse actuation.
    pub released: Vec<ActiveLock>,
    /// Enabled rules that could not be evaluated this tick.
    pub rules_skipped: usize,
}

#[derive(Debug, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
    locks: Vec<ActiveLock>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: unique_ids(rules),
            locks: Vec::new(),
        }
    }

    // ── Rule set ──────────────────────────────────────────────

    /// Replace the rule set wholesale.
    ///
    /// Locks belonging to rules that no longer exist are discarded without
    /// actuation; their relays stay where they are.  Later rules reusing an
    /// id are dropped.
    pub fn replace_rules(&mut self, rules: Vec<Rule>) {
        let rules = unique_ids(rules);
        let before = self.locks.len();
        self.locks
            .retain(|lock| rules.iter().any(|r| r.id == lock.rule_id));
        let dropped = before - self.locks.len();
        info!(
            "Rules: replaced rule set ({} rules, {} stale locks dropped)",
            rules.len(),
            dropped
        );
        self.rules = rules;
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn locks(&self) -> &[ActiveLock] {
        &self.locks
    }

    pub fn lock_for(&self, rule_id: &str) -> Option<&ActiveLock> {
        self.locks.iter().find(|l| l.rule_id == rule_id)
    }

    /// Put back a lock whose release could not be applied.  Ignored if the
    /// rule already holds a lock or no longer exists.
    pub fn restore_lock(&mut self, lock: ActiveLock) -> bool {
        if self.lock_for(&lock.rule_id).is_some() || !self.rules.iter().any(|r| r.id == lock.rule_id) {
            return false;
        }
        debug!("Rules: '{}' release pending, lock restored", lock.rule_id);
        self.locks.push(lock);
        true
    }

    // ── Tick ──────────────────────────────────────────────────

    /// Evaluate every enabled rule against `snapshot` at time `now`.
    pub fn tick(&mut self, now: u64, snapshot: &SensorSnapshot) -> TickReport {
        let mut report = TickReport::default();

        // 1. Expire orphaned locks whose hold window has elapsed.
        let rules = &self.rules;
        let before = self.locks.len();
        self.locks.retain(|lock| {
            now < lock.lock_until
                || rules
                    .iter()
                    .any(|r| r.enabled && r.id == lock.rule_id)
        });
        report.locks_expired = before - self.locks.len();

        // 2. Evaluate in stored order.
        for rule in self.rules.iter().filter(|r| r.enabled) {
            let Some(met) = rule.condition.evaluate(snapshot) else {
                debug!("Rules: '{}' not evaluable, skipped", rule.id);
                report.rules_skipped += 1;
                continue;
            };

            let existing = self.locks.iter().position(|l| l.rule_id == rule.id);

            if met {
                if existing.is_none() {
                    let lock_until = now.saturating_add(u64::from(rule.action.min_hold_ms));
                    self.locks.push(ActiveLock {
                        rule_id: rule.id.clone(),
                        lock_until,
                        action: rule.action,
                    });
                    report.locks_created += 1;
                    debug!("Rules: '{}' locked until {}", rule.id, lock_until);
                }
                report.actuations.push(Actuation {
                    rule_id: rule.id.clone(),
                    node: rule.action.node,
                    channel: rule.action.channel,
                    on: rule.action.turn_on,
                });
            } else if let Some(idx) = existing {
                if now >= self.locks[idx].lock_until {
                    let lock = self.locks.swap_remove(idx);
                    report.actuations.push(Actuation {
                        rule_id: lock.rule_id.clone(),
                        node: lock.action.node,
                        channel: lock.action.channel,
                        on: !lock.action.turn_on,
                    });
                    report.locks_released += 1;
                    report.released.push(lock);
                }
                // else: hold window still open, condition already cleared.
            }
        }

        report
    }
}

/// Keep the first rule of each id.
fn unique_ids(mut rules: Vec<Rule>) -> Vec<Rule> {
    let mut i = 0;
    while i < rules.len() {
        if rules[..i].iter().any(|r| r.id == rules[i].id) {
            let dup = rules.remove(i);
            warn!("Rules: duplicate id '{}' at index {} ignored", dup.id, i);
        } else {
            i += 1;
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Comparison, RuleCondition, SensorKey};

    fn rule(id: &str, op: Comparison, threshold: f32, channel: u8, on: bool, hold: u32) -> Rule {
        Rule {
            id: id.into(),
            name: id.into(),
            enabled: true,
            condition: RuleCondition {
                sensor: "temperatureC".into(),
                op,
                threshold,
                hysteresis: 0.0,
            },
            action: RuleAction {
                channel,
                turn_on: on,
                min_hold_ms: hold,
                node: 0,
            },
        }
    }

    fn temp(v: f32) -> SensorSnapshot {
        SensorSnapshot::new().with(SensorKey::TemperatureC, v)
    }

    fn last_state(report: &TickReport, channel: u8) -> Option<bool> {
        report
            .actuations
            .iter()
            .rev()
            .find(|a| a.channel == channel)
            .map(|a| a.on)
    }

    #[test]
    fn heat_example_holds_until_window_elapses() {
        let mut engine = RuleEngine::new(vec![rule("heat", Comparison::Gt, 30.0, 0, true, 5000)]);

        let r = engine.tick(0, &temp(31.0));
        assert_eq!(last_state(&r, 0), Some(true));
        assert_eq!(engine.lock_for("heat").unwrap().lock_until, 5000);

        for t in [1000, 2000, 4999] {
            let r = engine.tick(t, &temp(20.0));
            assert!(r.actuations.is_empty(), "flip at t={t}");
        }

        let r = engine.tick(5000, &temp(20.0));
        assert_eq!(last_state(&r, 0), Some(false));
        assert_eq!(r.locks_released, 1);
        assert!(engine.locks().is_empty());
    }

    #[test]
    fn condition_true_reasserts_without_new_lock() {
        let mut engine = RuleEngine::new(vec![rule("r", Comparison::Gt, 30.0, 1, true, 100)]);
        let a = engine.tick(0, &temp(35.0));
        let b = engine.tick(50, &temp(35.0));
        assert_eq!(a.locks_created, 1);
        assert_eq!(b.locks_created, 0);
        assert_eq!(b.actuations.len(), 1);
        assert_eq!(engine.locks().len(), 1);
    }

    #[test]
    fn lock_outlives_window_while_condition_holds() {
        let mut engine = RuleEngine::new(vec![rule("r", Comparison::Gt, 30.0, 1, true, 100)]);
        engine.tick(0, &temp(35.0));
        let r = engine.tick(10_000, &temp(35.0));
        assert_eq!(r.locks_expired, 0);
        assert!(engine.lock_for("r").is_some());
        let r = engine.tick(10_001, &temp(10.0));
        assert_eq!(last_state(&r, 1), Some(false));
    }

    #[test]
    fn false_without_lock_does_nothing() {
        let mut engine = RuleEngine::new(vec![rule("r", Comparison::Gt, 30.0, 0, true, 0)]);
        let r = engine.tick(0, &temp(10.0));
        assert!(r.actuations.is_empty());
    }

    #[test]
    fn absent_reading_skips_rule_and_keeps_lock() {
        let mut engine = RuleEngine::new(vec![rule("r", Comparison::Gt, 30.0, 0, true, 0)]);
        engine.tick(0, &temp(31.0));
        let r = engine.tick(10, &SensorSnapshot::new());
        assert!(r.actuations.is_empty());
        assert_eq!(r.rules_skipped, 1);
        assert!(engine.lock_for("r").is_some());
    }

    #[test]
    fn later_rule_wins_on_shared_channel() {
        let mut engine = RuleEngine::new(vec![
            rule("on", Comparison::Gt, 0.0, 2, true, 0),
            rule("off", Comparison::Gt, 0.0, 2, false, 0),
        ]);
        let r = engine.tick(0, &temp(5.0));
        assert_eq!(r.actuations.len(), 2);
        assert_eq!(last_state(&r, 2), Some(false));
    }

    #[test]
    fn disabled_rule_lock_expires_silently() {
        let mut engine = RuleEngine::new(vec![rule("r", Comparison::Gt, 30.0, 0, true, 1000)]);
        engine.tick(0, &temp(31.0));

        let mut disabled = engine.rules().to_vec();
        disabled[0].enabled = false;
        engine.replace_rules(disabled);

        let r = engine.tick(500, &temp(10.0));
        assert_eq!(r.locks_expired, 0);
        assert!(r.actuations.is_empty());

        let r = engine.tick(1000, &temp(10.0));
        assert_eq!(r.locks_expired, 1);
        assert!(r.actuations.is_empty());
        assert!(engine.locks().is_empty());
    }

    #[test]
    fn replace_drops_locks_of_removed_rules() {
        let mut engine = RuleEngine::new(vec![
            rule("keep", Comparison::Gt, 0.0, 0, true, 1000),
            rule("gone", Comparison::Gt, 0.0, 1, true, 1000),
        ]);
        engine.tick(0, &temp(5.0));
        assert_eq!(engine.locks().len(), 2);

        engine.replace_rules(vec![rule("keep", Comparison::Gt, 0.0, 0, true, 1000)]);
        assert_eq!(engine.locks().len(), 1);
        assert!(engine.lock_for("keep").is_some());
    }

    #[test]
    fn release_uses_the_locked_action() {
        let mut engine = RuleEngine::new(vec![rule("r", Comparison::Gt, 30.0, 3, true, 0)]);
        engine.tick(0, &temp(31.0));
        // Rule edited to a different channel while locked.
        engine.replace_rules(vec![rule("r", Comparison::Gt, 30.0, 4, true, 0)]);
        let r = engine.tick(1, &temp(20.0));
        assert_eq!(r.actuations[0].channel, 3);
        assert!(!r.actuations[0].on);
    }

    #[test]
    fn duplicate_id_cannot_release_first_rules_lock() {
        let mut engine = RuleEngine::new(Vec::new());
        engine.replace_rules(vec![
            rule("dup", Comparison::Gt, 30.0, 0, true, 5000),
            rule("dup", Comparison::Lt, 10.0, 1, true, 0),
        ]);
        assert_eq!(engine.rules().len(), 1);

        for t in (0..=12_000).step_by(1000) {
            let r = engine.tick(t, &temp(35.0));
            assert_eq!(last_state(&r, 0), Some(true), "ch0 flipped at t={t}");
            assert_eq!(r.locks_released, 0);
        }
    }

    #[test]
    fn restored_lock_retries_release() {
        let mut engine = RuleEngine::new(vec![rule("r", Comparison::Gt, 30.0, 2, true, 100)]);
        engine.tick(0, &temp(35.0));

        let r = engine.tick(100, &temp(20.0));
        assert_eq!(r.released.len(), 1);
        assert!(engine.locks().is_empty());

        assert!(engine.restore_lock(r.released[0].clone()));
        let r = engine.tick(200, &temp(20.0));
        assert_eq!(last_state(&r, 2), Some(false));
        assert!(engine.locks().is_empty());
    }

    #[test]
    fn restore_ignores_removed_rule() {
        let mut engine = RuleEngine::new(vec![rule("r", Comparison::Gt, 30.0, 2, true, 0)]);
        engine.tick(0, &temp(35.0));
        let r = engine.tick(1, &temp(20.0));
        engine.replace_rules(Vec::new());
        assert!(!engine.restore_lock(r.released[0].clone()));
    }

    #[test]
    fn forwarded_action_keeps_node() {
        let mut r = rule("fwd", Comparison::Lt, 50.0, 1, true, 0);
        r.action.node = 2;
        let mut engine = RuleEngine::new(vec![r]);
        let report = engine.tick(0, &temp(10.0));
        assert_eq!(report.actuations[0].node, 2);
    }
}
