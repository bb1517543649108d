//! Euphoria id <-> Instant id conversion (spec §4.2).
//!
//! Euphoria ids are base-36 integers whose upper bits encode a timestamp in
//! milliseconds since [`crate::config::EUPHORIA_ID_EPOCH_SECS`]. Instant ids
//! are 16 hex-digit uppercase strings encoding `(timestamp_ms << 10) | seq`.

use crate::config::EUPHORIA_ID_EPOCH_SECS;
use crate::error::{BridgeError, Result};

/// Number of low bits in an Instant id reserved for the synthesis sequence.
const SEQUENCE_BITS: u32 = 10;
const SEQUENCE_MAX: u32 = (1 << SEQUENCE_BITS) - 1; // 1023

/// Parses a base-36 Euphoria message id and returns its embedded timestamp,
/// in milliseconds since the UNIX epoch.
pub fn euphoria_id_to_timestamp(msgid: &str) -> Result<u128> {
    let value = u128::from_str_radix(msgid, 36)
        .map_err(|_| BridgeError::ProtocolViolation(format!("not a base-36 id: {msgid}")))?;
    let epoch_ms = (EUPHORIA_ID_EPOCH_SECS as u128) * 1000;
    Ok((value >> 22) + epoch_ms)
}

/// Encodes `(timestamp_ms, sequence)` as the 16 hex-digit uppercase Instant
/// id form. `sequence` must fit in [`SEQUENCE_BITS`] bits.
pub fn timestamp_to_instant_id(timestamp_ms: u128, sequence: u32) -> String {
    debug_assert!(sequence <= SEQUENCE_MAX);
    let encoded = (timestamp_ms << SEQUENCE_BITS) | sequence as u128;
    format!("{encoded:016X}")
}

/// Synthesizes an Instant id for the given Euphoria id by scanning
/// `sequence` from 1023 down to 0 and calling `try_claim` for each
/// candidate until one succeeds (returns `true`) or the space is
/// exhausted.
pub fn synthesize_instant_id(
    euphoria_id: &str,
    mut try_claim: impl FnMut(&str) -> Result<bool>,
) -> Result<String> {
    let ts = euphoria_id_to_timestamp(euphoria_id)?;
    for seq in (0..=SEQUENCE_MAX).rev() {
        let candidate = timestamp_to_instant_id(ts, seq);
        if try_claim(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(BridgeError::TranslateExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_after_epoch() {
        let ts = euphoria_id_to_timestamp("10000000000").unwrap();
        assert!(ts > (EUPHORIA_ID_EPOCH_SECS as u128) * 1000);
    }

    #[test]
    fn instant_ids_are_16_hex_digits_and_differ_in_low_bits() {
        let ts = 1_700_000_000_000u128;
        let low = timestamp_to_instant_id(ts, 0);
        let high = timestamp_to_instant_id(ts, 1023);
        assert_eq!(low.len(), 16);
        assert_eq!(high.len(), 16);
        assert_ne!(low, high);
        // Same timestamp prefix, differing only in the low 10 bits.
        let low_val = u128::from_str_radix(&low, 16).unwrap();
        let high_val = u128::from_str_radix(&high, 16).unwrap();
        assert_eq!(low_val >> 10, high_val >> 10);
        assert_eq!(low_val & 0x3FF, 0);
        assert_eq!(high_val & 0x3FF, 1023);
    }

    #[test]
    fn synthesis_succeeds_1024_times_for_one_timestamp() {
        let mut claimed = std::collections::HashSet::new();
        for _ in 0..1024 {
            let id = synthesize_instant_id("10000000000", |candidate| {
                Ok(claimed.insert(candidate.to_string()))
            })
            .unwrap();
            assert_eq!(id.len(), 16);
        }
        // The 1025th request for the same timestamp must fail.
        let err = synthesize_instant_id("10000000000", |candidate| {
            Ok(claimed.insert(candidate.to_string()))
        });
        assert!(matches!(err, Err(BridgeError::TranslateExhausted)));
    }
}
