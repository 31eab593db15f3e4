// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Log descriptors: the handshake object of the sync protocol.
//!
//! A descriptor states which record IDs of one logical log the producing
//! side holds.
//!
//! # Wire Format
//!
//! ```text
//! encode(owner_id) "," log_id "," ranges
//! gw$k01,3,1-5,8
//! ```
//!
//! Only the owner ID is escaped. The range-set grammar has no `$`, so the
//! first two commas split the record and everything after them is the set.

use crate::codec;
use crate::error::{ReconcileError, Result};
use crate::range::RangeSet;
use std::fmt;
use std::str::FromStr;

/// Which record IDs of `(owner_id, log_id)` a side holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub owner_id: String,
    pub log_id: i64,
    pub ranges: RangeSet,
}

impl Descriptor {
    pub fn new(owner_id: impl Into<String>, log_id: i64, ranges: RangeSet) -> Self {
        Self {
            owner_id: owner_id.into(),
            log_id,
            ranges,
        }
    }

    /// Descriptor for a log the answering side knows nothing about.
    pub fn empty(owner_id: impl Into<String>, log_id: i64) -> Self {
        Self::new(owner_id, log_id, RangeSet::new())
    }

    /// Single-line wire representation.
    pub fn to_representation(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            codec::encode(&self.owner_id),
            self.log_id,
            self.ranges
        )
    }
}

impl FromStr for Descriptor {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        let mut fields = s.splitn(3, ',');
        let (Some(owner), Some(log_id), Some(ranges)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(ReconcileError::InvalidInput(format!(
                "descriptor needs owner, log id and ranges: '{}'",
                s
            )));
        };

        let log_id = log_id.parse::<i64>().map_err(|_| {
            ReconcileError::InvalidInput(format!("invalid log id '{}' in descriptor", log_id))
        })?;

        Ok(Self {
            owner_id: codec::decode(owner)?,
            log_id,
            ranges: ranges.parse()?,
        })
    }
}
