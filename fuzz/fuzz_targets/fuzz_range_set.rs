//! Fuzz target for range-set parsing.
//!
//! Arbitrary text must either be rejected or parse to a canonical set whose
//! representation parses back to the same set.

#![no_main]

use libfuzzer_sys::fuzz_target;
use reconciliation_engine::RangeSet;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    // Should never panic
    let Ok(set) = a.parse::<RangeSet>() else {
        return;
    };

    let text = set.to_representation();
    let reparsed: RangeSet = text.parse().expect("canonical form must parse");
    assert_eq!(reparsed, set);
    assert_eq!(reparsed.to_representation(), text);

    // Canonical ranges are sorted, disjoint and non-adjacent
    for pair in set.ranges().windows(2) {
        assert!(pair[0].high() < pair[1].low().saturating_sub(1));
    }

    if let Ok(other) = b.parse::<RangeSet>() {
        assert_eq!(set.union(&other), other.union(&set));
        let missing = RangeSet::missing(&set, &other);
        // Bounded walk: sets can span most of i64
        for id in missing.iter().take(1024) {
            assert!(other.contains(id));
            assert!(!set.contains(id));
        }
        assert!(RangeSet::missing(&set, &set).is_empty());
    }
});
