use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `message` with the shared callback secret.
/// Returns the lowercase hex-encoded MAC.
pub fn compute_hmac(secret: &[u8], message: &[u8]) -> String {
    let tag = keyed(secret, message).finalize().into_bytes();
    let mut out = String::with_capacity(tag.len() * 2);
    for byte in tag {
        out.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        out.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Verify a hex HMAC-SHA256 signature over `message`.
///
/// Comparison is constant-time. Signatures that are not valid hex are
/// compared against a zero MAC so they take the same path as wrong ones.
pub fn verify_hmac(secret: &[u8], message: &[u8], signature: &str) -> bool {
    let mac = keyed(secret, message);
    let expected = decode_hex(signature.trim()).unwrap_or_else(|| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn keyed(secret: &[u8], message: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    mac
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let nibble = |c: u8| (c as char).to_digit(16).map(|d| d as u8);
    let bytes = text.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }
    bytes
        .chunks_exact(2)
        .map(|pair| Some(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}
