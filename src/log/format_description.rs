//! Format Description Event (§3, §4.4): established by the first event of
//! every binlog file, cached for the stream's lifetime, and consulted to
//! learn the checksum algorithm and each event type's post-header length.
//!
//! Grounded on the teacher's scattered `FORMAT_DESCRIPTION_EVENT`
//! constants and post-header-length table (`src/command/event.rs`); the
//! teacher never assembles them into a struct, so the struct shape here is
//! new.

use crate::error::{Error, Result};
use crate::log::event;

/// Checksum algorithm advertised by the FDE's trailing byte (absent on
/// servers older than 5.6.1, in which case `None` is assumed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    None,
    Crc32,
}

#[derive(Debug, Clone)]
pub struct FormatDescription {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub common_header_length: u8,
    /// Indexed by `event_type - 1`; `post_header_length(event_type)` does
    /// the off-by-one lookup.
    pub post_header_lengths: Vec<u8>,
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl FormatDescription {
    pub fn post_header_length(&self, event_type: u8) -> u8 {
        if event_type == 0 {
            return 0;
        }
        self.post_header_lengths
            .get(event_type as usize - 1)
            .copied()
            .unwrap_or(0)
    }

    /// A conservative default used only before the real FDE has arrived
    /// (the first event of a stream is always the FDE itself, so this is
    /// never consulted for event dispatch, only as a safe zero value).
    pub fn unknown() -> Self {
        FormatDescription {
            binlog_version: 4,
            server_version: String::new(),
            create_timestamp: 0,
            common_header_length: event::COMMON_HEADER_LENGTH as u8,
            post_header_lengths: Vec::new(),
            checksum_algorithm: ChecksumAlgorithm::None,
        }
    }

    /// Parses the body (post common-header) of a `FORMAT_DESCRIPTION_EVENT`.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 + 50 + 1 {
            return Err(Error::Protocol("format description event too short".into()));
        }
        let binlog_version = u16::from_le_bytes([body[0], body[1]]);
        let server_version = String::from_utf8_lossy(&body[2..52])
            .trim_end_matches('\0')
            .to_string();
        let create_timestamp = u32::from_le_bytes(body[52..56].try_into().unwrap());
        let common_header_length = body[56];

        // the last byte of the post-header table is the checksum algorithm
        // on servers that support checksums (5.6.1+); absent on older ones.
        // the table's true length cannot be known without that distinction,
        // so: if the trailing byte parses as a known algorithm value (0 or
        // 1) we treat it as such and exclude it from the table, else the
        // whole remainder is the table and checksums are assumed absent.
        let rest = &body[57..];
        let (post_header_lengths, checksum_algorithm) = match rest.last() {
            Some(0) => (rest[..rest.len() - 1].to_vec(), ChecksumAlgorithm::None),
            Some(1) => (rest[..rest.len() - 1].to_vec(), ChecksumAlgorithm::Crc32),
            _ => (rest.to_vec(), ChecksumAlgorithm::None),
        };

        Ok(FormatDescription {
            binlog_version,
            server_version,
            create_timestamp,
            common_header_length,
            post_header_lengths,
            checksum_algorithm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(checksum_byte: u8) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&4u16.to_le_bytes()); // binlog_version
        let mut version = vec![0u8; 50];
        version[..5].copy_from_slice(b"5.7.0");
        body.extend_from_slice(&version);
        body.extend_from_slice(&0u32.to_le_bytes()); // create_timestamp
        body.push(19); // common_header_length
        body.extend_from_slice(&[56u8; 40]); // post-header lengths, arbitrary
        body.push(checksum_byte);
        body
    }

    #[test]
    fn parses_server_version_and_common_header_length() {
        let fde = FormatDescription::parse(&fixture(1)).unwrap();
        assert_eq!(fde.server_version, "5.7.0");
        assert_eq!(fde.common_header_length, 19);
        assert_eq!(fde.checksum_algorithm, ChecksumAlgorithm::Crc32);
        assert_eq!(fde.post_header_lengths.len(), 40);
    }

    #[test]
    fn checksum_none_when_trailing_byte_is_zero() {
        let fde = FormatDescription::parse(&fixture(0)).unwrap();
        assert_eq!(fde.checksum_algorithm, ChecksumAlgorithm::None);
    }
}
