//! Fuzz target for event lines arriving in an upload body.

#![no_main]

use libfuzzer_sys::fuzz_target;
use reconciliation_engine::codec::{decode, encode};
use reconciliation_engine::Event;

fuzz_target!(|data: (&str, &str)| {
    let (line, field) = data;

    if let Ok(event) = line.parse::<Event>() {
        assert!(event.id > 0);
        let rendered = event.to_representation();
        assert!(!rendered.contains('\n') && !rendered.contains('\r'));
        assert_eq!(rendered.parse::<Event>().ok(), Some(event));
    }

    // Escaping is lossless for any field
    assert_eq!(decode(&encode(field)).ok().as_deref(), Some(field));
});
