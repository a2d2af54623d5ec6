//! Keyed one-way replacement tokens.
//!
//! Tokenization replaces a matched value with a stable pseudonym derived
//! from HMAC-SHA256 over the detector id and the matched text. The same
//! input under the same key always yields the same token, so downstream
//! joins on the tokenized value keep working; truncation to 64 bits is an
//! accepted collision tradeoff.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_PREFIX: &str = "TKN_";

/// Number of hex characters kept from the digest.
const TOKEN_HEX_LEN: usize = 16;

/// Produce the replacement token for a matched value.
pub fn tokenize(detector_id: &str, matched: &str, key: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key).expect("hmac-sha256 accepts keys of any length");
    mac.update(detector_id.as_bytes());
    mac.update(b":");
    mac.update(matched.as_bytes());
    let digest = mac.finalize().into_bytes();
    let hex = hex::encode(digest);
    format!("{TOKEN_PREFIX}{}", &hex[..TOKEN_HEX_LEN])
}
