//! Fuzz target for descriptor lines received from peers.
//!
//! Parsing must never panic, and anything accepted must render to a line
//! that parses back to the same descriptor.

#![no_main]

use libfuzzer_sys::fuzz_target;
use reconciliation_engine::Descriptor;

fuzz_target!(|line: &str| {
    let Ok(descriptor) = line.parse::<Descriptor>() else {
        return;
    };

    let rendered = descriptor.to_representation();
    assert!(!rendered.contains('\n'));
    assert_eq!(rendered.parse::<Descriptor>().ok(), Some(descriptor));
});
