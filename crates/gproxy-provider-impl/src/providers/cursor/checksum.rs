//! Jyh cipher checksum used to authenticate requests against Cursor's backend.
//!
//! The checksum windows the current time to a coarse bucket (the value
//! changes roughly every 1000 seconds), XOR-chains the bucket's bytes through
//! a running key seeded at 165, then base64-url encodes the result and
//! appends it to the stable per-account machine id.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

const KEY_SEED: u8 = 165;
const WINDOW_DIVISOR: u64 = 1_000_000;

/// Builds the `x-cursor-checksum` header value for `unix_time_ms`.
pub fn compute_checksum(machine_id: &str, unix_time_ms: u64) -> String {
    let window = unix_time_ms / WINDOW_DIVISOR;
    let time_bytes = window.to_be_bytes();
    let time_bytes = &time_bytes[2..]; // low 6 bytes, big-endian

    let mut key = KEY_SEED;
    let mut out = [0u8; 6];
    for (i, byte) in time_bytes.iter().enumerate() {
        out[i] = byte ^ key;
        key = out[i];
    }

    let encoded = URL_SAFE_NO_PAD.encode(out);
    format!("{machine_id}{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic_within_the_same_window() {
        let a = compute_checksum("machine-1", 1_700_000_000_000);
        let b = compute_checksum("machine-1", 1_700_000_000_500);
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_changes_across_windows() {
        let a = compute_checksum("machine-1", 1_700_000_000_000);
        let b = compute_checksum("machine-1", 1_700_001_000_001);
        assert_ne!(a, b);
    }

    #[test]
    fn checksum_is_prefixed_with_the_machine_id() {
        let checksum = compute_checksum("abc123", 1_700_000_000_000);
        assert!(checksum.starts_with("abc123"));
        assert!(checksum.len() > "abc123".len());
    }
}
