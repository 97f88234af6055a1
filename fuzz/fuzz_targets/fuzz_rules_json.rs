//! Fuzz target: rule set JSON from the Administrative API.
//!
//! Whatever the body, parsing must not panic, validation must index only
//! real entries, and the engine must survive a tick over the result.
//!
//! cargo fuzz run fuzz_rules_json

#![no_main]

use libfuzzer_sys::fuzz_target;
use terrahub::rules::{parse_rules, rules_to_json, validate_rules, RuleEngine, SensorKey, SensorSnapshot};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let Ok(rules) = parse_rules(text) else {
        return;
    };

    for issue in validate_rules(&rules, 5) {
        assert!(issue.index < rules.len());
    }

    // Out-of-range floats come back as null, so only the array shape is
    // guaranteed to survive.
    let json = rules_to_json(&rules).expect("parsed rules serialise");
    assert!(parse_rules(&json).is_ok());

    let snapshot = SensorSnapshot::new()
        .with(SensorKey::TemperatureC, 24.0)
        .with(SensorKey::HumidityPercent, 55.0);
    let mut engine = RuleEngine::new(rules);
    engine.tick(0, &snapshot);
    engine.tick(u64::MAX, &snapshot);
});
