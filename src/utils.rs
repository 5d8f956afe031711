//! Utility functions and helpers
//!
//! Hash count and hash rate formatting used by the engine and the binary.

use std::time::Duration;

/// Format a hash count as thousands, or millions above ten million
pub fn format_hashes(hashes: u64) -> String {
    if hashes > 10_000_000 {
        format!("{:.1}M", hashes as f64 / 1_000_000.0)
    } else {
        format!("{:.1}K", hashes as f64 / 1_000.0)
    }
}

/// Format hash rate as a human-readable string
pub fn format_hash_rate(hashes_per_sec: f64) -> String {
    const UNITS: &[&str] = &["H/s", "KH/s", "MH/s", "GH/s", "TH/s", "PH/s"];
    let mut rate = hashes_per_sec;
    let mut unit_index = 0;

    while rate >= 1000.0 && unit_index < UNITS.len() - 1 {
        rate /= 1000.0;
        unit_index += 1;
    }

    format!("{:.2} {}", rate, UNITS[unit_index])
}

/// Hashes per second over `elapsed`, zero for an empty interval
pub fn compute_hash_rate(hashes: u64, elapsed: Duration) -> f64 {
    let elapsed_secs = elapsed.as_secs_f64();
    if elapsed_secs > 0.0 {
        hashes as f64 / elapsed_secs
    } else {
        0.0
    }
}

/// Round a rate to two decimals
pub fn round_rate(rate: f64) -> f64 {
    (rate * 100.0).round() / 100.0
}
