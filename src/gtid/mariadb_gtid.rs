//! MariaDB GTID sets: `domain_id -> (server_id, seq_no)`, at most one entry
//! per domain, replaced on update by the higher `seq_no` (§4.3).

use std::collections::BTreeMap;
use std::fmt;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MariadbGtid {
    pub domain_id: u32,
    pub server_id: u32,
    pub seq_no: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MariadbGtidSet {
    domains: BTreeMap<u32, MariadbGtid>,
}

impl MariadbGtidSet {
    pub fn new() -> Self {
        MariadbGtidSet { domains: BTreeMap::new() }
    }

    /// Parses `"0-1-100,1-2-50"` (§4.3, §8).
    pub fn parse(text: &str) -> Result<Self> {
        let mut set = MariadbGtidSet::new();
        let text = text.trim();
        if text.is_empty() {
            return Ok(set);
        }
        for entry in text.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let mut parts = entry.splitn(3, '-');
            let domain_id = parts
                .next()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| Error::GtidParse(format!("invalid domain id in {entry:?}")))?;
            let server_id = parts
                .next()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| Error::GtidParse(format!("invalid server id in {entry:?}")))?;
            let seq_no = parts
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| Error::GtidParse(format!("invalid seq_no in {entry:?}")))?;
            set.update(MariadbGtid { domain_id, server_id, seq_no });
        }
        Ok(set)
    }

    /// Replaces the entry for `gtid.domain_id` only if `gtid.seq_no` is
    /// higher than (or no entry exists for) the current one.
    pub fn update(&mut self, gtid: MariadbGtid) {
        match self.domains.get(&gtid.domain_id) {
            Some(existing) if existing.seq_no >= gtid.seq_no => {}
            _ => {
                self.domains.insert(gtid.domain_id, gtid);
            }
        }
    }

    pub fn union(&self, other: &MariadbGtidSet) -> MariadbGtidSet {
        let mut result = self.clone();
        for gtid in other.domains.values() {
            result.update(*gtid);
        }
        result
    }

    pub fn contains(&self, other: &MariadbGtidSet) -> bool {
        other.domains.values().all(|want| {
            self.domains
                .get(&want.domain_id)
                .map(|mine| mine.seq_no >= want.seq_no)
                .unwrap_or(false)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn get(&self, domain_id: u32) -> Option<&MariadbGtid> {
        self.domains.get(&domain_id)
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.domains.len() * (4 + 4 + 8)
    }

    /// `u32 n_domains || { u32 domain, u32 server, u64 seq }*` (§4.3).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.write_u32::<LittleEndian>(self.domains.len() as u32).unwrap();
        for gtid in self.domains.values() {
            out.write_u32::<LittleEndian>(gtid.domain_id).unwrap();
            out.write_u32::<LittleEndian>(gtid.server_id).unwrap();
            out.write_u64::<LittleEndian>(gtid.seq_no).unwrap();
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let n_domains = cursor.read_u32::<LittleEndian>()?;
        let mut set = MariadbGtidSet::new();
        for _ in 0..n_domains {
            let domain_id = cursor.read_u32::<LittleEndian>()?;
            let server_id = cursor.read_u32::<LittleEndian>()?;
            let seq_no = cursor.read_u64::<LittleEndian>()?;
            set.domains.insert(domain_id, MariadbGtid { domain_id, server_id, seq_no });
        }
        Ok(set)
    }
}

impl fmt::Display for MariadbGtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .domains
            .values()
            .map(|g| format!("{}-{}-{}", g.domain_id, g.server_id, g.seq_no))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_domains_from_spec_example() {
        let set = MariadbGtidSet::parse("0-1-100,1-2-50").unwrap();
        assert_eq!(set.get(0), Some(&MariadbGtid { domain_id: 0, server_id: 1, seq_no: 100 }));
        assert_eq!(set.get(1), Some(&MariadbGtid { domain_id: 1, server_id: 2, seq_no: 50 }));
        assert_eq!(set.to_string(), "0-1-100,1-2-50");
    }

    #[test]
    fn update_keeps_higher_seq_no_per_domain() {
        let mut set = MariadbGtidSet::parse("0-1-100").unwrap();
        set.update(MariadbGtid { domain_id: 0, server_id: 1, seq_no: 50 });
        assert_eq!(set.get(0).unwrap().seq_no, 100);
        set.update(MariadbGtid { domain_id: 0, server_id: 1, seq_no: 150 });
        assert_eq!(set.get(0).unwrap().seq_no, 150);
    }

    #[test]
    fn encode_decode_round_trips() {
        let set = MariadbGtidSet::parse("0-1-100,1-2-50").unwrap();
        let encoded = set.encode();
        assert_eq!(encoded.len(), set.encoded_len());
        assert_eq!(MariadbGtidSet::decode(&encoded).unwrap(), set);
    }

    #[test]
    fn contains_respects_per_domain_seq_no() {
        let bigger = MariadbGtidSet::parse("0-1-100").unwrap();
        let smaller = MariadbGtidSet::parse("0-1-50").unwrap();
        assert!(bigger.contains(&smaller));
        assert!(!smaller.contains(&bigger));
    }
}
