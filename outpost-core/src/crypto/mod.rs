// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod encryption;
pub mod integrity;
pub mod keys;

pub use encryption::{decrypt, encrypt, open, seal, EncryptionError, SymmetricKey};
pub use integrity::{integrity_hash, verify_integrity};
pub use keys::{CipherError, EncryptedBlob, KeyGeneration, KeyManager, DEFAULT_ROTATION_INTERVAL};
