// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Field escaping for comma- and newline-delimited wire records.
//!
//! ```text
//! $  → $$
//! ,  → $k
//! \n → $n
//! \r → $r
//! ```
//!
//! An encoded field never contains a raw comma, newline or carriage return,
//! so records can be split on `,` and streams on `\n` without ambiguity.

use crate::error::{ReconcileError, Result};

const ESCAPE: char = '$';

/// Escape `value` for embedding in a comma-delimited record.
pub fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '$' => out.push_str("$$"),
            ',' => out.push_str("$k"),
            '\n' => out.push_str("$n"),
            '\r' => out.push_str("$r"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`encode`].
///
/// Fails on an unknown escape or a trailing lone `$`.
pub fn decode(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('$') => out.push('$'),
            Some('k') => out.push(','),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                return Err(ReconcileError::InvalidInput(format!(
                    "unknown escape '${}' in '{}'",
                    other, value
                )))
            }
            None => {
                return Err(ReconcileError::InvalidInput(format!(
                    "dangling escape at end of '{}'",
                    value
                )))
            }
        }
    }

    Ok(out)
}
