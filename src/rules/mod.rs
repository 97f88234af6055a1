//! Rule model — the strongly typed form of the user's automation rules.
//!
//! JSON is only the wire/persistence shape; everything inside the firmware
//! works on [`Rule`].  The shape mirrors what the web UI produces:
//!
//! ```text
//! {
//!   "id": "heat-on", "name": "Heat lamp", "enabled": true,
//!   "condition": { "sensor": "temperatureC", "op": "lt", "threshold": 24.0, "hysteresis": 0.0 },
//!   "action":    { "relayIndex": 0, "turnOn": true, "minDurationMs": 60000, "node": 0 }
//! }
//! ```
//!
//! Every field has a default, so a partially specified rule still parses.
//! A rule that is missing its sensor or operator simply never fires.

pub mod engine;

use core::fmt;

use heapless::LinearMap;
use log::warn;
use serde::{Deserialize, Serialize};

pub use engine::{ActiveLock, Actuation, RuleEngine, TickReport};

// ───────────────────────────────────────────────────────────────
// Sensor vocabulary
// ───────────────────────────────────────────────────────────────

/// The fixed set of physical readings a node can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKey {
    #[serde(rename = "temperatureC")]
    TemperatureC,
    #[serde(rename = "humidityPercent")]
    HumidityPercent,
    #[serde(rename = "lightLevelLux")]
    LightLevelLux,
}

impl SensorKey {
    pub const ALL: [SensorKey; 3] = [
        SensorKey::TemperatureC,
        SensorKey::HumidityPercent,
        SensorKey::LightLevelLux,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TemperatureC => "temperatureC",
            Self::HumidityPercent => "humidityPercent",
            Self::LightLevelLux => "lightLevelLux",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ───────────────────────────────────────────────────────────────
// Sensor snapshot
// ───────────────────────────────────────────────────────────────

/// One poll cycle's worth of readings.
///
/// Missing readings are absent from the map; there are no sentinel values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SensorSnapshot {
    readings: LinearMap<SensorKey, f32, 3>,
}

impl SensorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.  NaN readings are treated as absent.
    #[must_use]
    pub fn with(mut self, key: SensorKey, value: f32) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: SensorKey, value: f32) {
        if value.is_nan() {
            self.readings.remove(&key);
            return;
        }
        // Capacity equals the vocabulary size, so insert cannot overflow.
        let _ = self.readings.insert(key, value);
    }

    pub fn get(&self, key: SensorKey) -> Option<f32> {
        self.readings.get(&key).copied()
    }

    /// Resolve a rule's sensor name.  Unknown names resolve to `None`.
    pub fn lookup(&self, name: &str) -> Option<f32> {
        SensorKey::from_name(name).and_then(|k| self.get(k))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SensorKey, f32)> + '_ {
        self.readings.iter().map(|(k, v)| (*k, *v))
    }
}

// ───────────────────────────────────────────────────────────────
// Rule types
// ───────────────────────────────────────────────────────────────

/// Comparison operator.  Anything the firmware does not recognise
/// deserializes to [`Comparison::Unknown`] and never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Comparison {
    /// `None` when the operator is unknown.
    pub fn apply(self, value: f32, threshold: f32, hysteresis: f32) -> Option<bool> {
        match self {
            Self::Gt => Some(value > threshold),
            Self::Lt => Some(value < threshold),
            Self::Gte => Some(value >= threshold),
            Self::Lte => Some(value <= threshold),
            Self::Eq => Some((value - threshold).abs() <= hysteresis),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCondition {
    /// Sensor name from the [`SensorKey`] vocabulary.  Kept as text so that
    /// an unrecognised name survives a load/save cycle unchanged.
    pub sensor: String,
    pub op: Comparison,
    pub threshold: f32,
    /// Tolerance band, used only by [`Comparison::Eq`].
    pub hysteresis: f32,
}

impl RuleCondition {
    /// Tri-state evaluation: `None` means the rule cannot be evaluated this
    /// tick (reading absent, unknown sensor, unknown operator).
    pub fn evaluate(&self, snapshot: &SensorSnapshot) -> Option<bool> {
        let value = snapshot.lookup(&self.sensor)?;
        self.op.apply(value, self.threshold, self.hysteresis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleAction {
    #[serde(rename = "relayIndex")]
    pub channel: u8,
    #[serde(rename = "turnOn")]
    pub turn_on: bool,
    #[serde(rename = "minDurationMs")]
    pub min_hold_ms: u32,
    /// Chain position that owns the relay.  0 is the controller itself.
    pub node: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub condition: RuleCondition,
    pub action: RuleAction,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            enabled: true,
            condition: RuleCondition::default(),
            action: RuleAction::default(),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// JSON boundary
// ───────────────────────────────────────────────────────────────

/// Parse a JSON array of rules.
///
/// The top level must be an array.  Individual entries that cannot be
/// decoded (wrong value types) are dropped with a warning so one bad rule
/// never discards the rest of the set.
pub fn parse_rules(json: &str) -> Result<Vec<Rule>, serde_json::Error> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let mut rules = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Rule>(entry) {
            Ok(rule) => rules.push(rule),
            Err(e) => warn!("Rules: dropping malformed entry #{}: {}", index, e),
        }
    }
    Ok(rules)
}

pub fn rules_to_json(rules: &[Rule]) -> Result<String, serde_json::Error> {
    serde_json::to_string(rules)
}

// ───────────────────────────────────────────────────────────────
// Validation (advisory; the engine never rejects a rule)
// ───────────────────────────────────────────────────────────────

/// A problem found in one rule of a candidate set.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleIssue {
    pub index: usize,
    pub rule_id: String,
    pub problem: RuleProblem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleProblem {
    EmptyId,
    DuplicateId,
    UnknownSensor,
    UnknownOperator,
    NegativeHysteresis,
    ChannelOutOfRange,
}

impl fmt::Display for RuleProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EmptyId => "empty id",
            Self::DuplicateId => "duplicate id",
            Self::UnknownSensor => "unknown sensor",
            Self::UnknownOperator => "unknown operator",
            Self::NegativeHysteresis => "negative hysteresis",
            Self::ChannelOutOfRange => "relay channel out of range",
        };
        f.write_str(s)
    }
}

/// Report every issue in `rules`.  `channel_count` bounds local actions;
/// forwarded actions (node ≠ 0) are checked against the same count since
/// every node in a chain carries the same relay board.
pub fn validate_rules(rules: &[Rule], channel_count: u8) -> Vec<RuleIssue> {
    let mut issues = Vec::new();
    let mut push = |index: usize, rule: &Rule, problem| {
        issues.push(RuleIssue {
            index,
            rule_id: rule.id.clone(),
            problem,
        });
    };

    for (i, rule) in rules.iter().enumerate() {
        if rule.id.is_empty() {
            push(i, rule, RuleProblem::EmptyId);
        } else if rules[..i].iter().any(|r| r.id == rule.id) {
            push(i, rule, RuleProblem::DuplicateId);
        }
        if SensorKey::from_name(&rule.condition.sensor).is_none() {
            push(i, rule, RuleProblem::UnknownSensor);
        }
        if rule.condition.op == Comparison::Unknown {
            push(i, rule, RuleProblem::UnknownOperator);
        }
        if rule.condition.hysteresis < 0.0 {
            push(i, rule, RuleProblem::NegativeHysteresis);
        }
        if rule.action.channel >= channel_count {
            push(i, rule, RuleProblem::ChannelOutOfRange);
        }
    }
    issues
}
