// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Errors returned by the encoding helpers in this crate.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// The input was not valid base64url (liberal about padding, strict
    /// about alphabet).
    #[error("invalid base64url input")]
    InvalidBase64Url,
    /// The input was not an even-length lowercase hex string.
    #[error("invalid hex input")]
    InvalidHex,
    /// A value expected to be a 64-character lowercase hex string wasn't.
    #[error("{label} must be a 64-character lowercase hex string")]
    NotHex64 {
        /// Human-readable label identifying which field failed.
        label: &'static str,
    },
}

/// Compute the raw SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Compute `sha256(bytes)` and render it as lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    bytes_to_hex(&sha256(bytes))
}

/// Render bytes as lowercase hex. Output never contains uppercase digits.
#[must_use]
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Decode a hex string into bytes.
///
/// Requires an even number of characters, every one of which must be in
/// `[0-9a-f]`. Uppercase is rejected; this crate never emits it and never
/// accepts it, per the spec's "uppercase is rejected on output, accepted
/// only where the spec says so (it does not)".
///
/// # Errors
///
/// Returns [`CodecError::InvalidHex`] if the length is odd or any character
/// falls outside `[0-9a-f]`.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>, CodecError> {
    if s.len() % 2 != 0 || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(CodecError::InvalidHex);
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| CodecError::InvalidHex))
        .collect()
}

/// Require that `s` is exactly a 64-character lowercase hex string
/// (the shape of every SHA-256 hash in this system).
///
/// # Errors
///
/// Returns [`CodecError::NotHex64`] if `s` does not match `^[0-9a-f]{64}$`.
pub fn require_hex64(label: &'static str, s: &str) -> Result<(), CodecError> {
    if s.len() == 64 && hex_to_bytes(s).is_ok() {
        Ok(())
    } else {
        Err(CodecError::NotHex64 { label })
    }
}

/// Encode bytes as unpadded base64url (`-`/`_` alphabet, no `=` padding).
#[must_use]
pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded (or padded) base64url into bytes.
///
/// Decoding is liberal about trailing `=` padding but strict about the
/// alphabet: standard-base64 `+`/`/` characters are rejected.
///
/// # Errors
///
/// Returns [`CodecError::InvalidBase64Url`] if `s` contains characters
/// outside the URL-safe alphabet or is otherwise malformed.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>, CodecError> {
    let trimmed = s.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|_| CodecError::InvalidBase64Url)
}

/// Serialize `n` as 4 big-endian bytes.
///
/// Used on the sealing side to encode the authenticator sign-count into
/// `authenticatorData`; the verifier only ever reads this field opaquely.
#[must_use]
pub fn u32_to_be_bytes(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

/// Parse 4 big-endian bytes as a `u32`.
#[must_use]
pub fn u32_from_be_bytes(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sha256_hex_is_64_lowercase_hex_chars() {
        let h = sha256_hex(b"hello");
        assert_eq!(h.len(), 64);
        assert!(h.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn hex_round_trip() {
        let bytes = [0u8, 1, 255, 16, 9];
        let hex = bytes_to_hex(&bytes);
        assert_eq!(hex, "0001ff1009");
        assert_eq!(hex_to_bytes(&hex).unwrap(), bytes);
    }

    #[test]
    fn hex_rejects_uppercase_and_odd_length() {
        assert_eq!(hex_to_bytes("AB"), Err(CodecError::InvalidHex));
        assert_eq!(hex_to_bytes("abc"), Err(CodecError::InvalidHex));
        assert_eq!(hex_to_bytes("zz"), Err(CodecError::InvalidHex));
    }

    #[test]
    fn require_hex64_checks_length_and_alphabet() {
        let good = "a".repeat(64);
        assert!(require_hex64("x", &good).is_ok());
        assert!(require_hex64("x", &"a".repeat(63)).is_err());
        assert!(require_hex64("x", &"A".repeat(64)).is_err());
    }

    #[test]
    fn base64url_has_no_padding_and_url_safe_alphabet() {
        let bytes = [0xffu8, 0xee, 0xdd, 0xcc, 0xbb];
        let encoded = base64url_encode(&bytes);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(base64url_decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn base64url_decode_rejects_standard_alphabet() {
        assert_eq!(base64url_decode("a+b/"), Err(CodecError::InvalidBase64Url));
    }

    #[test]
    fn base64url_decode_is_liberal_about_padding() {
        let bytes = b"hi";
        let padded = base64::engine::general_purpose::URL_SAFE.encode(bytes);
        assert_eq!(base64url_decode(&padded).unwrap(), bytes);
    }

    #[test]
    fn be_u32_round_trips() {
        let n = 0xdeadbeefu32;
        assert_eq!(u32_from_be_bytes(u32_to_be_bytes(n)), n);
        assert_eq!(u32_to_be_bytes(1), [0, 0, 0, 1]);
    }

    proptest! {
        #[test]
        fn base64url_round_trip(bytes: Vec<u8>) {
            let encoded = base64url_encode(&bytes);
            prop_assert_eq!(base64url_decode(&encoded).unwrap(), bytes);
        }

        #[test]
        fn hex_round_trip_prop(bytes: Vec<u8>) {
            let hex = bytes_to_hex(&bytes);
            prop_assert_eq!(hex_to_bytes(&hex).unwrap(), bytes);
        }
    }
}
