//! Read batteries issued against the rig

use std::ops::Range;

/// One-time battery run when a control session starts
pub const STARTUP_QUERIES: &[&str] = &["FA", "FB", "MD", "IF", "PC", "SM", "RG", "GT", "NR", "NB"];

/// Parameter-less FT-991A commands that answer a read
pub const POLL_QUERIES: &[&str] = &[
    "FA", "FB", "MD", "IF", "SM", "PC", "RG", "GT", "NR", "NB", "SQ", "MG", "RT", "OF", "CT",
    "DS", "PA", "RA", "VX", "KS",
];

/// Fallback battery when no poll set is configured
pub const MINIMAL_POLL_QUERIES: &[&str] = &["FA", "MD", "SM"];

/// Memory channels probed with `MR` at session start
pub const MEMORY_SCAN: Range<u16> = 0..125;

/// Parse a comma or whitespace separated list of codes into a battery
///
/// Codes are upper-cased, terminators stripped and anything that is not a
/// two-letter code is skipped. Falls back to [`MINIMAL_POLL_QUERIES`] when
/// nothing usable remains.
pub fn parse_battery(list: &str) -> Vec<String> {
    let codes: Vec<String> = list
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|code| code.trim().trim_end_matches(';').to_ascii_uppercase())
        .filter(|code| code.len() == 2 && code.bytes().all(|b| b.is_ascii_uppercase()))
        .collect();

    if codes.is_empty() {
        tracing::warn!("No usable poll codes in {:?}, using minimal set", list);
        return MINIMAL_POLL_QUERIES.iter().map(|s| s.to_string()).collect();
    }
    codes
}
