use std::time::{Duration, UNIX_EPOCH};
use chrono::{DateTime, Utc};
use substring::Substring;

/// Formats a binlog `u32` seconds-since-epoch value the way MySQL's own
/// `TIMESTAMP` textual form does.
pub fn timestamp_to_time(second: u64) -> String {
    let d = UNIX_EPOCH + Duration::from_secs(second);
    let datetime = DateTime::<Utc>::from(d);
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Renders a packed `year<<9 | month<<5 | day` DATE value (§4.5).
pub fn format_date(packed: u32) -> String {
    let year = packed >> 9;
    let month = (packed >> 5) & 0x0f;
    let day = packed & 0x1f;
    format!("{:04}-{:02}-{:02}", year, month, day)
}

/// Renders `fractional` (already scaled to microseconds) truncated to the
/// number of decimal digits implied by `meta` (the `TIMEN`/`DATETIMEN` column
/// metadata byte), left-padded with zeros. `meta` in {1,3,5} means the wire
/// carried 1/2/3 sub-byte groups; the digit count displayed is `meta` itself
/// per the MySQL fractional-seconds convention (1..6 decimal digits).
pub fn microseconds_to_fraction(frac_usec: i32, meta: u8) -> String {
    let padded = format!("{:06}", frac_usec.max(0));
    let digits = meta.min(6) as usize;
    padded.substring(0, digits).to_string()
}
