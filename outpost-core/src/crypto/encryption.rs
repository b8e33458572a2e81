// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Symmetric Encryption (AES-256-GCM / XChaCha20-Poly1305)
//!
//! Two formats are provided:
//!
//! - Detached AES-256-GCM (`seal` / `open`): the nonce is returned separately
//!   so queue rows can store `ciphertext`, `nonce` and `key_id` in their own
//!   columns. Associated data binds a ciphertext to the key generation that
//!   produced it.
//! - Tagged XChaCha20-Poly1305 envelope (`encrypt` / `decrypt`) used to wrap
//!   key material written to disk: `0x02 || nonce (24) || ciphertext || tag`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::XChaCha20Poly1305;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use zeroize::Zeroize;

/// Encryption error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed: data may be corrupted or wrong key")]
    DecryptionFailed,
    #[error("Ciphertext too short")]
    CiphertextTooShort,
    #[error("Unknown envelope tag: {0:#04x}")]
    UnknownTag(u8),
}

/// Algorithm tag for XChaCha20-Poly1305 envelopes.
const ALG_TAG_XCHACHA20: u8 = 0x02;

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
pub const AES_GCM_NONCE_SIZE: usize = 12;
/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
const XCHACHA20_NONCE_SIZE: usize = 24;
/// Authentication tag size (16 bytes for both algorithms).
const TAG_SIZE: usize = 16;

/// 256-bit symmetric encryption key.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; 32],
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't expose key bytes in debug output
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl SymmetricKey {
    /// Generates a new random symmetric key.
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let key = ring::rand::generate::<[u8; 32]>(&rng)
            .expect("System RNG should not fail")
            .expose();
        SymmetricKey { bytes: key }
    }

    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SymmetricKey { bytes }
    }

    /// Creates a key from a slice, failing unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(SymmetricKey { bytes })
    }

    /// Returns a reference to the key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

/// Seals `plaintext` with AES-256-GCM under a fresh random nonce.
///
/// Returns `(nonce, ciphertext || tag)`.
pub fn seal(
    key: &SymmetricKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<([u8; AES_GCM_NONCE_SIZE], Vec<u8>), EncryptionError> {
    let rng = SystemRandom::new();

    let mut nonce_bytes = [0u8; AES_GCM_NONCE_SIZE];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| EncryptionError::EncryptionFailed)?;
    let sealing_key = LessSafeKey::new(unbound_key);

    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    Ok((nonce_bytes, in_out))
}

/// Opens an AES-256-GCM ciphertext produced by [`seal`].
pub fn open(
    key: &SymmetricKey,
    aad: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if ciphertext.len() < AES_256_GCM.tag_len() {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let nonce_bytes: [u8; AES_GCM_NONCE_SIZE] = nonce
        .try_into()
        .map_err(|_| EncryptionError::DecryptionFailed)?;

    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| EncryptionError::DecryptionFailed)?;
    let opening_key = LessSafeKey::new(unbound_key);

    let mut buffer = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(aad),
            &mut buffer,
        )
        .map_err(|_| EncryptionError::DecryptionFailed)?;

    Ok(plaintext.to_vec())
}

/// Encrypts data into a tagged XChaCha20-Poly1305 envelope.
///
/// Output format: `0x02 || nonce (24 bytes) || ciphertext || tag (16 bytes)`
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let rng = SystemRandom::new();

    let mut nonce_bytes = [0u8; XCHACHA20_NONCE_SIZE];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = chacha20poly1305::XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EncryptionError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(1 + XCHACHA20_NONCE_SIZE + ciphertext.len());
    output.push(ALG_TAG_XCHACHA20);
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);

    Ok(output)
}

/// Decrypts a tagged envelope produced by [`encrypt`].
pub fn decrypt(key: &SymmetricKey, envelope: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let (&tag, data) = envelope
        .split_first()
        .ok_or(EncryptionError::CiphertextTooShort)?;

    if tag != ALG_TAG_XCHACHA20 {
        return Err(EncryptionError::UnknownTag(tag));
    }

    if data.len() < XCHACHA20_NONCE_SIZE + TAG_SIZE {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let nonce = chacha20poly1305::XNonce::from_slice(&data[..XCHACHA20_NONCE_SIZE]);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, &data[XCHACHA20_NONCE_SIZE..])
        .map_err(|_| EncryptionError::DecryptionFailed)
}
