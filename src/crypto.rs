//! Passphrase-based file encryption.
//!
//! Opaque cipher service for the key store and the `keytool` binary: callers
//! get `encrypt`/`decrypt` over armored strings and never see the algorithm
//! choice. AES-256-GCM with a PBKDF2-HMAC-SHA256 derived key; the on-disk
//! format is base64 over `salt || nonce || ciphertext` so encrypted key
//! files stay copy-pasteable text.
//!
//! The passphrase comes from the `MICROKIT_KEY_PASSPHRASE` environment
//! variable at process start — never from CLI arguments or request data.

use std::path::Path;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::Error;

/// Environment variable holding the key-file passphrase.
pub const PASSPHRASE_ENV: &str = "MICROKIT_KEY_PASSPHRASE";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ROUNDS: u32 = 600_000;

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// Encrypt `plaintext` under `passphrase`, returning an armored string.
///
/// A fresh random salt and nonce are drawn per call, so encrypting the same
/// input twice yields different ciphertexts.
pub fn encrypt(plaintext: &str, passphrase: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        .expect("AES-GCM encryption is infallible for in-memory buffers");

    let mut payload = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);
    BASE64.encode(payload)
}

/// Decrypt an armored string produced by [`encrypt`].
///
/// Any failure — bad armor, truncated payload, wrong passphrase, tampered
/// ciphertext — collapses to [`Error::Decrypt`]; the caller learns nothing
/// about which.
pub fn decrypt(armored: &str, passphrase: &str) -> Result<String, Error> {
    let payload = BASE64
        .decode(armored.trim())
        .map_err(|_| Error::Decrypt)?;
    if payload.len() < SALT_LEN + NONCE_LEN {
        return Err(Error::Decrypt);
    }
    let (salt, rest) = payload.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| Error::Decrypt)
}

/// Encrypt the file at `src` and write the armored result to `dst`.
pub fn encrypt_file(src: &Path, dst: &Path, passphrase: &str) -> Result<(), Error> {
    let plaintext = std::fs::read_to_string(src).map_err(|e| Error::io(src, e))?;
    let armored = encrypt(&plaintext, passphrase);
    std::fs::write(dst, armored).map_err(|e| Error::io(dst, e))
}

/// Decrypt the armored file at `path`, returning the original plaintext
/// byte-for-byte.
pub fn decrypt_file(path: &Path, passphrase: &str) -> Result<String, Error> {
    let armored = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    decrypt(&armored, passphrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let armored = encrypt("abc123\ndef456\n", "pass123");
        let plaintext = decrypt(&armored, "pass123").unwrap();
        assert_eq!(plaintext, "abc123\ndef456\n");
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let armored = encrypt("secret", "right");
        assert!(matches!(decrypt(&armored, "wrong"), Err(Error::Decrypt)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let armored = encrypt("secret", "pass");
        let mut payload = BASE64.decode(&armored).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        let tampered = BASE64.encode(payload);
        assert!(matches!(decrypt(&tampered, "pass"), Err(Error::Decrypt)));
    }

    #[test]
    fn test_garbage_armor_fails() {
        assert!(matches!(decrypt("not base64!!", "pass"), Err(Error::Decrypt)));
        assert!(matches!(decrypt("AAAA", "pass"), Err(Error::Decrypt)));
    }

    #[test]
    fn test_fresh_salt_per_encryption() {
        let a = encrypt("same input", "pass");
        let b = encrypt("same input", "pass");
        assert_ne!(a, b);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("keys.txt");
        let dst = dir.path().join("keys.enc");
        std::fs::write(&src, "key-one\nkey-two\n").unwrap();

        encrypt_file(&src, &dst, "pass123").unwrap();
        let plaintext = decrypt_file(&dst, "pass123").unwrap();
        assert_eq!(plaintext, "key-one\nkey-two\n");
    }
}
