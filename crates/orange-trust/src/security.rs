//! Constant-time comparison for shared secrets.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compare two secrets without leaking their content or length through timing.
///
/// Both inputs are reduced to SHA-256 digests and compared with
/// `subtle::ConstantTimeEq`. Used for the metrics bearer token and for
/// callback signatures that arrive already hex-encoded.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Shorten a signature for log output: first and last eight characters.
pub fn mask_signature(signature: &str) -> String {
    if signature.len() <= 16 || !signature.is_ascii() {
        return "***".to_string();
    }
    format!(
        "{}...{}",
        &signature[..8],
        &signature[signature.len() - 8..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_match() {
        assert!(constant_time_eq(b"metrics-token", b"metrics-token"));
    }

    #[test]
    fn different_inputs_do_not_match() {
        assert!(!constant_time_eq(b"metrics-token", b"metrics-tokem"));
    }

    #[test]
    fn different_length_inputs_do_not_match() {
        assert!(!constant_time_eq(b"short", b"much longer string"));
    }

    #[test]
    fn masks_long_signature() {
        let sig = "29fc53d9c129bd9cbe8862ee431eacbc3556e4019b1eceb2536ec35ec8a0429e";
        assert_eq!(mask_signature(sig), "29fc53d9...c8a0429e");
    }

    #[test]
    fn short_signature_fully_masked() {
        assert_eq!(mask_signature("abcd"), "***");
    }
}
