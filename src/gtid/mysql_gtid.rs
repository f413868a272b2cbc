//! MySQL GTID sets: `uuid -> [[start, end), ...]` over 64-bit transaction
//! numbers (§4.3, §8 scenario 1).

use std::collections::BTreeMap;
use std::fmt;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A half-open, disjoint interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn new(start: u64, end: u64) -> Self {
        Interval { start, end }
    }

    fn overlaps_or_touches(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// A MySQL-dialect GTID set: a `UUID -> sorted, coalesced interval list`
/// map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MysqlGtidSet {
    sets: BTreeMap<Uuid, Vec<Interval>>,
}

impl MysqlGtidSet {
    pub fn new() -> Self {
        MysqlGtidSet { sets: BTreeMap::new() }
    }

    /// Parses `"uuid:1-2:5,uuid2:1-100"` (§4.3, §8 scenario 1).
    pub fn parse(text: &str) -> Result<Self> {
        let mut set = MysqlGtidSet::new();
        let text = text.trim();
        if text.is_empty() {
            return Ok(set);
        }
        for group in text.split(',') {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            let mut parts = group.split(':');
            let uuid_str = parts
                .next()
                .ok_or_else(|| Error::GtidParse(format!("missing uuid in group {group:?}")))?;
            let uuid = Uuid::parse_str(uuid_str)
                .map_err(|e| Error::GtidParse(format!("invalid uuid {uuid_str:?}: {e}")))?;

            for interval_str in parts {
                let interval = parse_interval(interval_str)?;
                set.add_interval(uuid, interval);
            }
        }
        Ok(set)
    }

    /// Inserts `interval` under `uuid`, merging with any overlapping or
    /// adjacent interval already present.
    pub fn add_interval(&mut self, uuid: Uuid, interval: Interval) {
        let intervals = self.sets.entry(uuid).or_default();
        intervals.push(interval);
        coalesce(intervals);
    }

    pub fn add(&mut self, uuid: Uuid, start: u64, end: u64) {
        self.add_interval(uuid, Interval::new(start, end));
    }

    /// `self ∪ other`, returned as a new set.
    pub fn union(&self, other: &MysqlGtidSet) -> MysqlGtidSet {
        let mut result = self.clone();
        for (uuid, intervals) in &other.sets {
            for interval in intervals {
                result.add_interval(*uuid, *interval);
            }
        }
        result
    }

    pub fn union_in_place(&mut self, other: &MysqlGtidSet) {
        for (uuid, intervals) in &other.sets {
            for interval in intervals {
                self.add_interval(*uuid, *interval);
            }
        }
    }

    /// Whether every interval in `other` is fully covered by `self`.
    pub fn contains(&self, other: &MysqlGtidSet) -> bool {
        other.sets.iter().all(|(uuid, intervals)| {
            let Some(mine) = self.sets.get(uuid) else {
                return intervals.is_empty();
            };
            intervals.iter().all(|want| covers(mine, want))
        })
    }

    pub fn contains_transaction(&self, uuid: &Uuid, gno: u64) -> bool {
        self.sets
            .get(uuid)
            .map(|intervals| intervals.iter().any(|i| i.start <= gno && gno < i.end))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.values().all(|v| v.is_empty())
    }

    pub fn uuids(&self) -> impl Iterator<Item = &Uuid> {
        self.sets.keys()
    }

    /// The wire length of `encode()`, without materializing the buffer
    /// (§4.3, §8 scenario 1: 48 bytes for one uuid with one interval).
    pub fn encoded_len(&self) -> usize {
        8 + self
            .sets
            .values()
            .map(|intervals| 16 + 8 + intervals.len() * 16)
            .sum::<usize>()
    }

    /// `u64 n_uuids || { 16-byte uuid, u64 n_intervals, intervals as u64 pairs }*` (§4.3).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.write_u64::<LittleEndian>(self.sets.len() as u64).unwrap();
        for (uuid, intervals) in &self.sets {
            out.extend_from_slice(uuid.as_bytes());
            out.write_u64::<LittleEndian>(intervals.len() as u64).unwrap();
            for interval in intervals {
                out.write_u64::<LittleEndian>(interval.start).unwrap();
                out.write_u64::<LittleEndian>(interval.end).unwrap();
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let n_uuids = cursor.read_u64::<LittleEndian>()?;
        let mut set = MysqlGtidSet::new();
        for _ in 0..n_uuids {
            let mut uuid_bytes = [0u8; 16];
            std::io::Read::read_exact(&mut cursor, &mut uuid_bytes)?;
            let uuid = Uuid::from_bytes(uuid_bytes);
            let n_intervals = cursor.read_u64::<LittleEndian>()?;
            let mut intervals = Vec::with_capacity(n_intervals as usize);
            for _ in 0..n_intervals {
                let start = cursor.read_u64::<LittleEndian>()?;
                let end = cursor.read_u64::<LittleEndian>()?;
                intervals.push(Interval::new(start, end));
            }
            set.sets.insert(uuid, intervals);
        }
        Ok(set)
    }
}

impl fmt::Display for MysqlGtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut groups = Vec::with_capacity(self.sets.len());
        for (uuid, intervals) in &self.sets {
            if intervals.is_empty() {
                continue;
            }
            let ranges: Vec<String> = intervals
                .iter()
                .map(|i| {
                    if i.end == i.start + 1 {
                        format!("{}", i.start)
                    } else {
                        format!("{}-{}", i.start, i.end - 1)
                    }
                })
                .collect();
            groups.push(format!("{uuid}:{}", ranges.join(":")));
        }
        write!(f, "{}", groups.join(","))
    }
}

fn parse_interval(s: &str) -> Result<Interval> {
    let s = s.trim();
    match s.split_once('-') {
        Some((start, end)) => {
            let start: u64 = start
                .parse()
                .map_err(|_| Error::GtidParse(format!("invalid interval start {start:?}")))?;
            let end: u64 = end
                .parse()
                .map_err(|_| Error::GtidParse(format!("invalid interval end {end:?}")))?;
            if start > end {
                return Err(Error::GtidParse(format!("interval start {start} > end {end}")));
            }
            Ok(Interval::new(start, end + 1))
        }
        None => {
            let n: u64 = s
                .parse()
                .map_err(|_| Error::GtidParse(format!("invalid interval {s:?}")))?;
            Ok(Interval::new(n, n + 1))
        }
    }
}

/// Sorts `intervals` and merges any that overlap or touch end-to-end.
fn coalesce(intervals: &mut Vec<Interval>) {
    intervals.sort();
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals.drain(..) {
        match merged.last_mut() {
            Some(last) if last.overlaps_or_touches(&interval) => {
                last.end = last.end.max(interval.end);
                last.start = last.start.min(interval.start);
            }
            _ => merged.push(interval),
        }
    }
    *intervals = merged;
}

fn covers(intervals: &[Interval], want: &Interval) -> bool {
    intervals.iter().any(|i| i.start <= want.start && want.end <= i.end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_uuid_single_interval_from_spec_scenario() {
        let set = MysqlGtidSet::parse("de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2").unwrap();
        let uuid = Uuid::parse_str("de278ad0-2106-11e4-9f8e-6edd0ca20947").unwrap();
        let intervals = &set.sets[&uuid];
        assert_eq!(intervals, &[Interval::new(1, 3)]);
        assert_eq!(set.to_string(), "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2");
        assert_eq!(set.encoded_len(), 48);
    }

    #[test]
    fn encode_decode_round_trips() {
        let set = MysqlGtidSet::parse("de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2:5-10").unwrap();
        let encoded = set.encode();
        assert_eq!(encoded.len(), set.encoded_len());
        let decoded = MysqlGtidSet::decode(&encoded).unwrap();
        assert_eq!(decoded, set);
    }

    #[test]
    fn union_coalesces_adjacent_intervals() {
        let a = MysqlGtidSet::parse("de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2").unwrap();
        let b = MysqlGtidSet::parse("de278ad0-2106-11e4-9f8e-6edd0ca20947:3-4").unwrap();
        let unioned = a.union(&b);
        assert_eq!(unioned.to_string(), "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-4");
    }

    #[test]
    fn contains_is_reflexive_and_monotone_under_union() {
        let a = MysqlGtidSet::parse("de278ad0-2106-11e4-9f8e-6edd0ca20947:1-10").unwrap();
        let b = MysqlGtidSet::parse("de278ad0-2106-11e4-9f8e-6edd0ca20947:20-30").unwrap();
        assert!(a.contains(&a));
        let unioned = a.union(&b);
        assert!(unioned.contains(&a));
        assert!(unioned.contains(&b));
    }

    #[test]
    fn parse_rejects_malformed_uuid() {
        assert!(MysqlGtidSet::parse("not-a-uuid:1-2").is_err());
    }

    #[test]
    fn union_is_commutative() {
        let a = MysqlGtidSet::parse("de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2").unwrap();
        let b = MysqlGtidSet::parse("de278ad0-2106-11e4-9f8e-6edd0ca20947:10-20,aaaaaaaa-2106-11e4-9f8e-6edd0ca20947:1-5").unwrap();
        assert_eq!(a.union(&b), b.union(&a));
    }
}
