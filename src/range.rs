// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Range-set algebra over positive record IDs.
//!
//! A [`RangeSet`] describes "which IDs does this side hold" compactly, as a
//! sorted list of closed [`Range`]s. Both the log sync protocol (record IDs)
//! and the repository store (version numbers) speak it.
//!
//! # Canonical Form
//!
//! ```text
//! {1,2,3,5,10}   →   [1-3] [5] [10]   →   "1-3,5,10"
//! ```
//!
//! - ranges are strictly increasing
//! - consecutive ranges are separated by a gap of at least one missing ID
//!   (touching or overlapping ranges are always merged)
//! - every member is `>= 1`
//!
//! Every operation returns a new set in canonical form, so two sets with the
//! same members always compare equal and render to the same string.
//!
//! # Deltas
//!
//! [`RangeSet::missing`] is the operation the protocols are built on:
//!
//! ```rust
//! use reconciliation_engine::range::RangeSet;
//!
//! let remote: RangeSet = "1-5".parse().unwrap();
//! let local: RangeSet = "1-10".parse().unwrap();
//!
//! // What do we hold that the remote side lacks?
//! let delta = RangeSet::missing(&remote, &local);
//! assert_eq!(delta.to_string(), "6-10");
//! ```

use crate::error::{ReconcileError, Result};
use std::cmp::{max, min};
use std::fmt;
use std::iter::Rev;
use std::str::FromStr;

/// A closed interval `[low, high]` of positive integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range {
    low: i64,
    high: i64,
}

impl Range {
    /// Create a range, rejecting `low > high` and non-positive bounds.
    pub fn new(low: i64, high: i64) -> Result<Self> {
        if low < 1 {
            return Err(ReconcileError::InvalidInput(format!(
                "range bounds must be positive, got {}-{}",
                low, high
            )));
        }
        if low > high {
            return Err(ReconcileError::InvalidInput(format!(
                "range low {} is greater than high {}",
                low, high
            )));
        }
        Ok(Self { low, high })
    }

    /// Create the range holding only `value`.
    pub fn single(value: i64) -> Result<Self> {
        Self::new(value, value)
    }

    /// Lowest member.
    pub fn low(&self) -> i64 {
        self.low
    }

    /// Highest member.
    pub fn high(&self) -> i64 {
        self.high
    }

    /// Whether `value` lies in `[low, high]`.
    pub fn contains(&self, value: i64) -> bool {
        self.low <= value && value <= self.high
    }

    /// Number of members.
    pub fn len(&self) -> u64 {
        (self.high - self.low) as u64 + 1
    }

    /// Always false; a range holds at least one member.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

impl FromStr for Range {
    type Err = ReconcileError;

    /// Parse `"n"` or `"lo-hi"`. Bounds are plain ASCII digits, no sign.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            let invalid = || ReconcileError::InvalidInput(format!("invalid range '{}'", s));
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<i64>().map_err(|_| invalid())
        };

        match s.split_once('-') {
            Some((low, high)) => Self::new(parse(low)?, parse(high)?),
            None => Self::single(parse(s)?),
        }
    }
}

/// Canonical sorted union of disjoint, non-adjacent [`Range`]s.
///
/// See the module docs for the canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RangeSet {
    ranges: Vec<Range>,
}

impl RangeSet {
    /// The empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from explicit members.
    ///
    /// Order and duplicates are irrelevant. Fails on any member `< 1`.
    pub fn from_values(values: impl IntoIterator<Item = i64>) -> Result<Self> {
        let mut values: Vec<i64> = values.into_iter().collect();
        values.sort_unstable();
        values.dedup();

        let mut ranges = Vec::new();
        for value in values {
            push_coalesced(&mut ranges, Range::single(value)?);
        }
        Ok(Self { ranges })
    }

    /// Build a set from ranges in any order, merging overlaps.
    pub fn from_ranges(ranges: impl IntoIterator<Item = Range>) -> Self {
        let mut sorted: Vec<Range> = ranges.into_iter().collect();
        sorted.sort_unstable();

        let mut out = Vec::with_capacity(sorted.len());
        for range in sorted {
            push_coalesced(&mut out, range);
        }
        Self { ranges: out }
    }

    /// Whether some range covers `value`.
    pub fn contains(&self, value: i64) -> bool {
        let idx = self.ranges.partition_point(|r| r.high < value);
        self.ranges.get(idx).is_some_and(|r| r.low <= value)
    }

    /// Lowest member, or `0` for the empty set.
    pub fn low(&self) -> i64 {
        self.ranges.first().map(|r| r.low).unwrap_or(0)
    }

    /// Highest member, or `0` for the empty set.
    pub fn high(&self) -> i64 {
        self.ranges.last().map(|r| r.high).unwrap_or(0)
    }

    /// Number of members.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(Range::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The coalesced ranges, ascending.
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Union of both sets.
    pub fn union(&self, other: &RangeSet) -> RangeSet {
        let mut out = Vec::with_capacity(self.ranges.len() + other.ranges.len());
        let (mut a, mut b) = (self.ranges.iter().peekable(), other.ranges.iter().peekable());

        loop {
            let next = match (a.peek().copied(), b.peek().copied()) {
                (Some(x), Some(y)) if x.low <= y.low => a.next(),
                (Some(_), Some(_)) => b.next(),
                (Some(_), None) => a.next(),
                (None, Some(_)) => b.next(),
                (None, None) => break,
            };
            if let Some(range) = next {
                push_coalesced(&mut out, *range);
            }
        }

        RangeSet { ranges: out }
    }

    /// Members of `in_` that are absent from `from`.
    ///
    /// `missing(&remote, &local)` is what the remote side needs from us.
    pub fn missing(from: &RangeSet, in_: &RangeSet) -> RangeSet {
        let mut out = Vec::new();
        let mut j = 0;

        for r in &in_.ranges {
            while j < from.ranges.len() && from.ranges[j].high < r.low {
                j += 1;
            }

            let mut start = r.low;
            let mut k = j;
            loop {
                let Some(f) = from.ranges.get(k).filter(|f| f.low <= r.high) else {
                    out.push(Range { low: start, high: r.high });
                    break;
                };
                if f.low > start {
                    out.push(Range { low: start, high: f.low - 1 });
                }
                if f.high >= r.high {
                    break;
                }
                // f.high < r.high, so this cannot overflow
                start = max(start, f.high + 1);
                k += 1;
            }
        }

        RangeSet { ranges: out }
    }

    /// Members of `other` absent from `self` (`other \ self`).
    ///
    /// Kept for callers that think in terms of "what the destination needs";
    /// prefer [`RangeSet::missing`], which names both sides.
    pub fn diff_dest(&self, other: &RangeSet) -> RangeSet {
        RangeSet::missing(self, other)
    }

    /// Intersection with `[low, high]`.
    pub fn bounded(&self, low: i64, high: i64) -> RangeSet {
        let low = max(low, 1);
        let ranges = self
            .ranges
            .iter()
            .filter_map(|r| {
                let (l, h) = (max(r.low, low), min(r.high, high));
                (l <= h).then_some(Range { low: l, high: h })
            })
            .collect();
        RangeSet { ranges }
    }

    /// Ascending iterator over the individual members.
    ///
    /// Lazy, and restartable by calling `iter()` again.
    pub fn iter(&self) -> Values<'_> {
        Values::new(&self.ranges)
    }

    /// Descending iterator over the individual members.
    pub fn reverse_iter(&self) -> Rev<Values<'_>> {
        self.iter().rev()
    }

    /// Ascending iterator over the coalesced ranges.
    pub fn range_iter(&self) -> std::iter::Copied<std::slice::Iter<'_, Range>> {
        self.ranges.iter().copied()
    }

    /// Textual form, e.g. `"1-3,5,10"`. Empty set renders as `""`.
    pub fn to_representation(&self) -> String {
        self.to_string()
    }
}

/// Append `range`, merging with the last range if they touch or overlap.
///
/// Input must arrive sorted by `low`.
fn push_coalesced(out: &mut Vec<Range>, range: Range) {
    if let Some(last) = out.last_mut() {
        if range.low <= last.high.saturating_add(1) {
            last.high = max(last.high, range.high);
            return;
        }
    }
    out.push(range);
}

impl From<Range> for RangeSet {
    fn from(range: Range) -> Self {
        Self { ranges: vec![range] }
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

impl FromStr for RangeSet {
    type Err = ReconcileError;

    /// Parse `"a-b,c,d-e"`. The empty string is the empty set.
    ///
    /// Out-of-order or overlapping segments are normalized; empty segments,
    /// non-numeric values and `low > high` are rejected.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::new());
        }

        let ranges = s
            .split(',')
            .map(|segment| {
                if segment.is_empty() {
                    Err(ReconcileError::InvalidInput(format!(
                        "empty segment in range set '{}'",
                        s
                    )))
                } else {
                    segment.parse::<Range>()
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_ranges(ranges))
    }
}

impl<'a> IntoIterator for &'a RangeSet {
    type Item = i64;
    type IntoIter = Values<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over the members of a [`RangeSet`], usable from both ends.
#[derive(Debug, Clone)]
pub struct Values<'a> {
    ranges: &'a [Range],
    front_idx: usize,
    front: i64,
    back_idx: usize,
    back: i64,
    remaining: u64,
}

impl<'a> Values<'a> {
    fn new(ranges: &'a [Range]) -> Self {
        let remaining = ranges.iter().map(Range::len).sum();
        Self {
            ranges,
            front_idx: 0,
            front: ranges.first().map(|r| r.low).unwrap_or(0),
            back_idx: ranges.len().saturating_sub(1),
            back: ranges.last().map(|r| r.high).unwrap_or(0),
            remaining,
        }
    }
}

impl Iterator for Values<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let value = self.front;
        if value == self.ranges[self.front_idx].high {
            self.front_idx += 1;
            if let Some(next) = self.ranges.get(self.front_idx) {
                self.front = next.low;
            }
        } else {
            self.front += 1;
        }
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, usize::try_from(self.remaining).ok())
    }
}

impl DoubleEndedIterator for Values<'_> {
    fn next_back(&mut self) -> Option<i64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let value = self.back;
        if value == self.ranges[self.back_idx].low {
            if self.back_idx > 0 {
                self.back_idx -= 1;
                self.back = self.ranges[self.back_idx].high;
            }
        } else {
            self.back -= 1;
        }
        Some(value)
    }
}
