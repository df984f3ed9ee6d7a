//! AES-256-GCM vault encryption for secret values at rest.
//!
//! The master key comes from a raw 32-byte key, a password (Argon2id key
//! derivation), or the `FORGECI_VAULT_KEY` environment variable (hex).
//!
//! Encrypted format: `nonce (12 bytes) || ciphertext`.
//!
//! SECURITY: error types never carry plaintext, key material, or ciphertext.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Environment variable holding a hex-encoded 32-byte master key.
const VAULT_KEY_ENV: &str = "FORGECI_VAULT_KEY";

/// Errors from vault encryption operations.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid ciphertext: too short")]
    CiphertextTooShort,

    #[error("key derivation failed")]
    KeyDerivationFailed,

    #[error("{VAULT_KEY_ENV} is not set or not 64 hex characters")]
    InvalidKeyMaterial,
}

/// AES-256-GCM cipher for vaulted secrets.
///
/// Each encryption generates a fresh random nonce, prepended to the
/// ciphertext, so identical plaintexts never produce identical output.
pub struct VaultCrypto {
    cipher: Aes256Gcm,
}

impl VaultCrypto {
    /// Build from a raw 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Derive the key from a password with Argon2id (OWASP parameters:
    /// 19 MiB memory, 2 iterations, parallelism 1).
    ///
    /// The salt is a fixed vault identifier, so the same password always
    /// yields the same key; the password supplies the entropy and the
    /// derived key is used directly for encryption, never stored.
    pub fn from_password(password: &str) -> Result<Self, VaultError> {
        use argon2::{Algorithm, Argon2, Params, Version};

        let params =
            Params::new(19456, 2, 1, Some(32)).map_err(|_| VaultError::KeyDerivationFailed)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(password.as_bytes(), b"forgeci-vault-v1", &mut key)
            .map_err(|_| VaultError::KeyDerivationFailed)?;
        Ok(Self::new(&key))
    }

    /// Load the master key from `FORGECI_VAULT_KEY` (64 hex characters).
    pub fn from_env() -> Result<Self, VaultError> {
        let hex_key = std::env::var(VAULT_KEY_ENV).map_err(|_| VaultError::InvalidKeyMaterial)?;
        let bytes = hex::decode(hex_key.trim()).map_err(|_| VaultError::InvalidKeyMaterial)?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VaultError::InvalidKeyMaterial)?;
        Ok(Self::new(&key))
    }

    /// Generate a random master key, for first-time setup.
    pub fn generate_key() -> [u8; 32] {
        use aes_gcm::aead::rand_core::RngCore;
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypt plaintext; returns `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt data produced by [`VaultCrypto::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, VaultError> {
        if data.len() < NONCE_SIZE {
            return Err(VaultError::CiphertextTooShort);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let vault = VaultCrypto::new(&VaultCrypto::generate_key());
        let ciphertext = vault.encrypt(b"deploy-token-123").unwrap();
        assert_eq!(vault.decrypt(&ciphertext).unwrap(), b"deploy-token-123");
    }

    #[test]
    fn test_nonce_uniqueness() {
        let vault = VaultCrypto::new(&[7u8; 32]);
        let a = vault.encrypt(b"same").unwrap();
        let b = vault.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let vault = VaultCrypto::new(&[1u8; 32]);
        let other = VaultCrypto::new(&[2u8; 32]);
        let ciphertext = vault.encrypt(b"secret").unwrap();
        assert!(matches!(
            other.decrypt(&ciphertext),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let vault = VaultCrypto::new(&[1u8; 32]);
        assert!(matches!(
            vault.decrypt(&[0u8; 5]),
            Err(VaultError::CiphertextTooShort)
        ));
    }

    #[test]
    fn test_password_derivation_is_deterministic() {
        let a = VaultCrypto::from_password("hunter2").unwrap();
        let b = VaultCrypto::from_password("hunter2").unwrap();
        let ciphertext = a.encrypt(b"value").unwrap();
        assert_eq!(b.decrypt(&ciphertext).unwrap(), b"value");
    }

    #[test]
    fn test_error_output_never_contains_plaintext() {
        let err = VaultError::DecryptionFailed;
        let rendered = format!("{err} {err:?}");
        assert!(!rendered.contains("secret"));
    }
}
