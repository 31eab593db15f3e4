// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Audit events: one record of a logical log.
//!
//! # Wire Format
//!
//! ```text
//! encode(owner_id) "," log_id "," id "," timestamp "," type ("," encode(key) "," encode(value))*
//! gw-1,1,42,1718000000000,2001,name,bundle-a,version,1.0.3
//! ```
//!
//! Properties are written in key order, so a given event always renders to
//! the same line.

use crate::codec;
use crate::error::{ReconcileError, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One audit record, identified by `(owner_id, log_id, id)`.
///
/// Ordering is by that identity first, ascending.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub owner_id: String,
    pub log_id: i64,
    /// Producer-assigned record ID, dense from 1 within a log.
    pub id: i64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub event_type: i32,
    pub properties: BTreeMap<String, String>,
}

impl Event {
    /// Create an event with no properties, stamped now.
    pub fn new(owner_id: impl Into<String>, log_id: i64, id: i64, event_type: i32) -> Self {
        Self {
            owner_id: owner_id.into(),
            log_id,
            id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            event_type,
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder-style timestamp setter.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The `(owner_id, log_id, id)` identity.
    pub fn identity(&self) -> (&str, i64, i64) {
        (&self.owner_id, self.log_id, self.id)
    }

    /// Single-line wire representation (no trailing newline).
    pub fn to_representation(&self) -> String {
        self.to_string()
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity()
            .cmp(&other.identity())
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| self.event_type.cmp(&other.event_type))
            .then_with(|| self.properties.cmp(&other.properties))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            codec::encode(&self.owner_id),
            self.log_id,
            self.id,
            self.timestamp,
            self.event_type
        )?;
        for (key, value) in &self.properties {
            write!(f, ",{},{}", codec::encode(key), codec::encode(value))?;
        }
        Ok(())
    }
}

fn parse_field<T: FromStr>(name: &str, value: Option<&str>, line: &str) -> Result<T> {
    let value = value.ok_or_else(|| {
        ReconcileError::InvalidInput(format!("event is missing {}: '{}'", name, line))
    })?;
    value.parse::<T>().map_err(|_| {
        ReconcileError::InvalidInput(format!("invalid {} '{}' in event", name, value))
    })
}

impl FromStr for Event {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        let mut fields = s.split(',');

        let owner_id = codec::decode(fields.next().unwrap_or_default())?;
        let log_id = parse_field::<i64>("log id", fields.next(), s)?;
        let id = parse_field::<i64>("id", fields.next(), s)?;
        let timestamp = parse_field::<i64>("timestamp", fields.next(), s)?;
        let event_type = parse_field::<i32>("type", fields.next(), s)?;

        if id < 1 {
            return Err(ReconcileError::InvalidInput(format!(
                "event id must be positive, got {}",
                id
            )));
        }

        let mut properties = BTreeMap::new();
        while let Some(key) = fields.next() {
            let Some(value) = fields.next() else {
                return Err(ReconcileError::InvalidInput(format!(
                    "property '{}' has no value in event {}",
                    key, id
                )));
            };
            properties.insert(codec::decode(key)?, codec::decode(value)?);
        }

        Ok(Self {
            owner_id,
            log_id,
            id,
            timestamp,
            event_type,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event::new("gw-1", 1, 42, 2001)
            .with_timestamp(1_718_000_000_000)
            .with_property("name", "bundle-a")
            .with_property("version", "1.0.3")
    }

    #[test]
    fn test_event_representation() {
        assert_eq!(
            sample().to_representation(),
            "gw-1,1,42,1718000000000,2001,name,bundle-a,version,1.0.3"
        );
    }

    #[test]
    fn test_event_parse() {
        let e: Event = "gw-1,1,42,1718000000000,2001,name,bundle-a,version,1.0.3"
            .parse()
            .unwrap();
        assert_eq!(e, sample());
    }

    #[test]
    fn test_event_without_properties() {
        let e = Event::new("t", 2, 1, 5).with_timestamp(10);
        assert_eq!(e.to_string(), "t,2,1,10,5");
        assert_eq!("t,2,1,10,5".parse::<Event>().unwrap(), e);
    }

    #[test]
    fn test_escaped_fields_round_trip() {
        let e = Event::new("gw,id\n\r$", 1, 7, 1)
            .with_timestamp(99)
            .with_property("a,b", "line1\nline2")
            .with_property("$cost", "1,000$");
        let line = e.to_representation();
        assert!(!line.contains('\n'));
        assert!(!line.contains('\r'));

        let parsed: Event = line.parse().unwrap();
        assert_eq!(parsed.owner_id, "gw,id\n\r$");
        assert_eq!(parsed, e);
    }

    #[test]
    fn test_event_parse_rejects_malformed() {
        let bad = [
            "",
            "t",
            "t,1,2,3",
            "t,x,2,3,4",
            "t,1,2,3,4,lonely-key",
            "t,1,2,3,4,k,v,lonely",
            "t,1,0,3,4",
            "t,1,2,3,99999999999",
        ];
        for line in bad {
            assert!(line.parse::<Event>().is_err(), "accepted '{}'", line);
        }
    }

    #[test]
    fn test_event_ordering_by_identity() {
        let mut events = vec![
            Event::new("b", 1, 1, 0),
            Event::new("a", 2, 1, 0),
            Event::new("a", 1, 3, 0),
            Event::new("a", 1, 2, 0),
        ];
        events.sort();
        let ids: Vec<_> = events
            .iter()
            .map(|e| (e.owner_id.clone(), e.log_id, e.id))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("a".to_string(), 1, 2),
                ("a".to_string(), 1, 3),
                ("a".to_string(), 2, 1),
                ("b".to_string(), 1, 1),
            ]
        );
    }
}
