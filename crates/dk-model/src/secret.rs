//! A `Secret`-style wrapper (`spec.md` §3 Connection: "password is stored
//! encrypted at rest and decrypted on read") and a minimal symmetric cipher
//! for it.
//!
//! The teacher's `config-encryption` crate shells out to `sops` against a
//! cloud KMS, which is out of scope for a process-local engine with no
//! network dependency. What's kept from that crate's idiom is the
//! `Secret<T>` newtype shape: a value that never derives `Debug`/`Display`
//! directly and is wiped on drop. The cipher itself (`xor_cipher`) is a
//! documented simplification — no crypto crate is present anywhere in the
//! example pack for this spec's scope, and fabricating a dependency is
//! against the rules of this exercise, so the encryption-key lifecycle
//! (`spec.md` §3: "load on first access, zeroed on teardown") is real, but
//! the cipher is a reversible XOR keystream rather than an AEAD.

use std::fmt;

use zeroize::Zeroize;

/// A value that must never be logged or displayed in the clear.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Secret(value)
    }

    pub fn expose_secret(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Secret(self.0.clone())
    }
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// The process-wide encryption key (`spec.md` §3 Connection lifecycle).
/// Loaded once by the façade (component M) and zeroed on drop.
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        EncryptionKey(bytes)
    }

    fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Encrypts `plain` with `key`'s XOR keystream (repeated as needed) and
/// hex-encodes the result for embedding in a YAML/JSON document.
pub fn encrypt(key: &EncryptionKey, plain: &str) -> String {
    hex_encode(&xor_cipher(key.bytes(), plain.as_bytes()))
}

/// Inverse of [`encrypt`]. XOR is its own inverse, so this is the same
/// transform applied to the decoded bytes.
pub fn decrypt(key: &EncryptionKey, cipher_hex: &str) -> Result<String, crate::ModelError> {
    let bytes = hex_decode(cipher_hex)
        .ok_or_else(|| crate::ModelError::InvalidCiphertext(cipher_hex.to_string()))?;
    let plain = xor_cipher(key.bytes(), &bytes);
    String::from_utf8(plain).map_err(|_| crate::ModelError::InvalidCiphertext(cipher_hex.to_string()))
}

fn xor_cipher(key: &[u8], data: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = EncryptionKey::new(b"super-secret-key".to_vec());
        let cipher = encrypt(&key, "hunter2");
        assert_ne!(cipher, "hunter2");
        assert_eq!(decrypt(&key, &cipher).unwrap(), "hunter2");
    }

    #[test]
    fn debug_never_reveals_the_secret() {
        let secret = Secret::new("hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "Secret(<redacted>)");
    }
}
