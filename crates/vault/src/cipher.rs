//! AES-256-GCM sealing of credential material.
//!
//! Sealed form is `base64(iv):base64(tag):base64(ciphertext)` with a random
//! 12-byte IV and the 16-byte GCM authentication tag.

use crate::error::{VaultError, VaultResult};
use crate::key::EncryptionKey;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Seals and unseals credential material.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Create a vault from key material.
    pub fn new(key: &EncryptionKey) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt a plaintext credential into the sealed wire form.
    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        // aes-gcm appends the tag to the ciphertext; the sealed form keeps
        // it as a separate segment.
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            BASE64.encode(iv),
            BASE64.encode(tag),
            BASE64.encode(ciphertext)
        ))
    }

    /// Decrypt a sealed credential back to plaintext.
    pub fn decrypt(&self, sealed: &str) -> VaultResult<String> {
        let mut parts = sealed.splitn(3, ':');
        let (iv, tag, ciphertext) = match (parts.next(), parts.next(), parts.next()) {
            (Some(iv), Some(tag), Some(ct)) => (iv, tag, ct),
            _ => {
                return Err(VaultError::Malformed(
                    "expected iv:tag:ciphertext".to_string(),
                ));
            }
        };

        let iv = BASE64
            .decode(iv)
            .map_err(|e| VaultError::Malformed(format!("iv: {e}")))?;
        let tag = BASE64
            .decode(tag)
            .map_err(|e| VaultError::Malformed(format!("tag: {e}")))?;
        let ciphertext = BASE64
            .decode(ciphertext)
            .map_err(|e| VaultError::Malformed(format!("ciphertext: {e}")))?;

        if iv.len() != IV_LEN {
            return Err(VaultError::Malformed(format!(
                "iv must be {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(VaultError::Malformed(format!(
                "tag must be {TAG_LEN} bytes, got {}",
                tag.len()
            )));
        }

        let mut combined = ciphertext;
        combined.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), combined.as_ref())
            .map_err(|e| VaultError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| VaultError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        Vault::new(&EncryptionKey::generate())
    }

    #[test]
    fn round_trip() {
        let vault = vault();
        let sealed = vault.encrypt("sk-super-secret-key-12345").unwrap();
        assert_eq!(vault.decrypt(&sealed).unwrap(), "sk-super-secret-key-12345");
    }

    #[test]
    fn sealed_form_has_three_segments() {
        let vault = vault();
        let sealed = vault.encrypt("sk-super-secret-key-12345").unwrap();
        let parts: Vec<&str> = sealed.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(BASE64.decode(parts[0]).unwrap().len(), IV_LEN);
        assert_eq!(BASE64.decode(parts[1]).unwrap().len(), TAG_LEN);
    }

    #[test]
    fn distinct_ivs_per_encryption() {
        let vault = vault();
        let a = vault.encrypt("same-plaintext-here").unwrap();
        let b = vault.encrypt("same-plaintext-here").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let sealed = vault().encrypt("sk-super-secret-key-12345").unwrap();
        let other = vault();
        assert!(matches!(
            other.decrypt(&sealed),
            Err(VaultError::Decrypt(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let vault = vault();
        let sealed = vault.encrypt("sk-super-secret-key-12345").unwrap();
        let mut parts: Vec<String> = sealed.split(':').map(String::from).collect();
        let mut ct = BASE64.decode(&parts[2]).unwrap();
        ct[0] ^= 0xff;
        parts[2] = BASE64.encode(ct);
        assert!(vault.decrypt(&parts.join(":")).is_err());
    }

    #[test]
    fn malformed_input_is_rejected() {
        let vault = vault();
        assert!(matches!(
            vault.decrypt("no-separators"),
            Err(VaultError::Malformed(_))
        ));
        assert!(matches!(
            vault.decrypt("a:b"),
            Err(VaultError::Malformed(_))
        ));
        assert!(vault.decrypt("!!!:!!!:!!!").is_err());
    }
}
