// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Payload integrity hashing.
//!
//! The hash is taken over the plaintext and re-checked after decryption,
//! independently of the AEAD tag.

use ring::digest::{digest, SHA256};

/// Length of a hex-encoded SHA-256 digest.
pub const INTEGRITY_HASH_HEX_LEN: usize = 64;

/// Returns the hex-encoded SHA-256 digest of `data`.
pub fn integrity_hash(data: &[u8]) -> String {
    hex::encode(digest(&SHA256, data).as_ref())
}

/// Checks `data` against an expected hex digest in constant time.
pub fn verify_integrity(data: &[u8], expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let actual = digest(&SHA256, data);
    ring::constant_time::verify_slices_are_equal(actual.as_ref(), &expected).is_ok()
}
